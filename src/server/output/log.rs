//! Line-oriented sink: one formatted log line per request

use super::{content_length_text, OutputSink, StatusFamily};
use crate::server::record::RequestRecord;
use crate::server::types::ResolvedAddresses;
use crossterm::style::{StyledContent, Stylize};
use std::sync::Arc;
use tracing::info;

/// Writes request lines through `tracing`, which serializes concurrent writers
#[derive(Clone, Debug, Default)]
pub struct LogSink {
    colored: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Plain text lines, for log files and tests
    pub fn plain() -> Self {
        Self { colored: false }
    }

    pub fn format_line(&self, record: &RequestRecord) -> String {
        let status = record.status.as_u16().to_string();
        let status = if self.colored {
            styled_status(&status, StatusFamily::of(record.status)).to_string()
        } else {
            status
        };
        format!(
            "{}\t{:?}\t{}\t{}\t{} {}",
            record.remote_address,
            record.duration,
            status,
            record.method,
            record.url,
            content_length_text(record.content_length)
        )
        .trim_end()
        .to_string()
    }
}

fn styled_status(status: &str, family: StatusFamily) -> StyledContent<&str> {
    match family {
        StatusFamily::Success => status.green().bold(),
        StatusFamily::ClientError => status.yellow().bold(),
        StatusFamily::ServerError => status.red().bold(),
        StatusFamily::Other => status.blue().bold(),
    }
}

impl OutputSink for LogSink {
    fn init(&self, location: &str, addresses: &ResolvedAddresses) {
        info!("Serving {location} at {addresses}");
    }

    fn write(&self, record: Arc<RequestRecord>) {
        info!("{}", self.format_line(&record));
    }
}
