//! Reverse proxy relaying tunnel traffic to a backend on `localhost`

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, uri::PathAndQuery, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    Router,
};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use tracing::{debug, error};

/// Forwards every request to `http://localhost:<backend_port><path+query>`
#[derive(Clone)]
pub struct ReverseProxyForwarder {
    backend_port: u16,
    client: Client<HttpConnector, Body>,
}

impl ReverseProxyForwarder {
    pub fn new(backend_port: u16) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .build_http();
        Self {
            backend_port,
            client,
        }
    }

    pub fn into_router(self) -> Router {
        Router::new()
            .fallback(forward_handler)
            .with_state(Arc::new(self))
    }

    fn target_uri(&self, original: &Uri) -> Result<Uri, http::Error> {
        let path_and_query = original
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        Uri::builder()
            .scheme("http")
            .authority(format!("localhost:{}", self.backend_port))
            .path_and_query(path_and_query)
            .build()
    }

    /// Relay one request; the body is streamed in both directions
    pub async fn forward(&self, request: Request) -> Response {
        let (mut parts, body) = request.into_parts();
        parts.uri = match self.target_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                error!(error = %e, "Error creating proxy request");
                return StatusCode::BAD_GATEWAY.into_response();
            }
        };
        // the client derives Host from the target authority
        parts.headers.remove(header::HOST);
        parts.version = Version::HTTP_11;

        debug!(method = %parts.method, uri = %parts.uri, "Forwarding request");
        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => response.map(Body::new),
            Err(e) if is_connection_refused(&e) => {
                error!(error = %e, port = self.backend_port, "Backend refused the connection");
                (
                    StatusCode::BAD_GATEWAY,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    refused_message(self.backend_port),
                )
                    .into_response()
            }
            Err(e) => {
                error!(error = %e, "Error proxying request");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
}

pub fn refused_message(port: u16) -> String {
    format!(
        "servant: connection to local port {port} was refused, check that your server is up and running"
    )
}

fn is_connection_refused(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if let Some(io_error) = e.downcast_ref::<io::Error>() {
            if io_error.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

async fn forward_handler(
    State(forwarder): State<Arc<ReverseProxyForwarder>>,
    request: Request,
) -> Response {
    forwarder.forward(request).await
}
