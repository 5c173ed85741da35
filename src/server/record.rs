//! Per-request records and the in-memory history they are kept in

use chrono::{DateTime, Local};
use http::{Method, StatusCode};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Remote peer of a connection, attached to every request as an extension
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAddress(pub String);

/// Placeholder used when a request reaches the pipeline without a known peer
pub const UNKNOWN_REMOTE: &str = "unknown";

/// What happened to a single request.
///
/// Built once the response has been fully written and never mutated after
/// it is handed to the history and the output sink.
#[derive(Clone, Debug)]
pub struct RequestRecord {
    pub remote_address: String,
    /// Request target as received (path and query)
    pub url: String,
    pub method: Method,
    pub status: StatusCode,
    pub duration: Duration,
    pub content_type: Option<String>,
    pub content_length: u64,
    /// Declared size of the request body, the body itself is streamed to the handler
    pub body_size: Option<u64>,
    pub completed_at: DateTime<Local>,
}

/// Append-only history of completed requests
#[derive(Debug, Default)]
pub struct RequestHistory {
    records: RwLock<Vec<Arc<RequestRecord>>>,
}

impl RequestHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, record: Arc<RequestRecord>) {
        self.records.write().push(record);
    }

    /// First record whose URL matches exactly
    pub fn find(&self, url: &str) -> Option<Arc<RequestRecord>> {
        self.records
            .read()
            .iter()
            .find(|record| record.url == url)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
