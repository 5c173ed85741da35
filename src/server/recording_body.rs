//! Response body wrapper that emits a [`RequestRecord`] once the body is done

use crate::server::output::OutputSink;
use crate::server::record::{RequestHistory, RequestRecord};
use chrono::Local;
use http::{Method, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Instant;

/// Request state captured before the response body starts streaming
pub struct Completion {
    pub start: Instant,
    pub remote_address: String,
    pub url: String,
    pub method: Method,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub content_length: u64,
    pub body_size: Option<u64>,
    pub history: Arc<RequestHistory>,
    pub sink: Arc<dyn OutputSink>,
}

impl Completion {
    fn finish(self) {
        let record = Arc::new(RequestRecord {
            remote_address: self.remote_address,
            url: self.url,
            method: self.method,
            status: self.status,
            duration: self.start.elapsed(),
            content_type: self.content_type,
            content_length: self.content_length,
            body_size: self.body_size,
            completed_at: Local::now(),
        });
        self.history.add(Arc::clone(&record));
        self.sink.write(record);
    }
}

/// Fires the completion at most once: at end of stream, on error, or on drop
struct RecordOnDrop(Option<Completion>);

impl RecordOnDrop {
    fn fire(&mut self) {
        if let Some(completion) = self.0.take() {
            completion.finish();
        }
    }
}

impl Drop for RecordOnDrop {
    fn drop(&mut self) {
        self.fire();
    }
}

pin_project! {
    /// Streams the inner body untouched and records the request when it ends
    pub struct RecordingBody<B> {
        #[pin]
        inner: B,
        completion: RecordOnDrop,
    }
}

impl<B> RecordingBody<B> {
    pub fn new(inner: B, completion: Completion) -> Self {
        Self {
            inner,
            completion: RecordOnDrop(Some(completion)),
        }
    }
}

impl<B> Body for RecordingBody<B>
where
    B: Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        match &frame {
            Some(Ok(_)) => {}
            // errors end the stream as far as the record is concerned
            Some(Err(_)) | None => this.completion.fire(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
