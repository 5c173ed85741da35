//! Consumers of completed request records
//!
//! The pipeline only talks to the [`OutputSink`] capability: `init` once the
//! addresses are known and `write` once per completed request, possibly from
//! many connection tasks at the same time.

pub mod interactive;
pub mod log;

pub use interactive::InteractiveSink;
pub use log::LogSink;

use crate::server::record::RequestRecord;
use crate::server::types::ResolvedAddresses;
use http::StatusCode;
use std::sync::Arc;

/// Receiver of request records
pub trait OutputSink: Send + Sync {
    /// Called exactly once, after address resolution and before serving
    fn init(&self, location: &str, addresses: &ResolvedAddresses);

    /// Called once per completed request; must be safe to call concurrently
    fn write(&self, record: Arc<RequestRecord>);

    /// Release terminal or background resources after the server stopped
    fn close(&self) {}
}

/// Status code family used to colour request lines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusFamily {
    Success,
    ClientError,
    ServerError,
    Other,
}

impl StatusFamily {
    pub fn of(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Success
        } else if status.is_client_error() {
            Self::ClientError
        } else if status.is_server_error() {
            Self::ServerError
        } else {
            Self::Other
        }
    }
}

/// `(N bytes)` suffix, empty when the length is unknown or zero
pub fn content_length_text(length: u64) -> String {
    if length != 0 {
        format!("({length} bytes)")
    } else {
        String::new()
    }
}
