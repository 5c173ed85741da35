//! Opens a URL in the user's default browser

use reqwest::Url;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;

type UrlParseError = <Url as std::str::FromStr>::Err;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlParseError,
    },

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("unsupported platform")]
    UnsupportedPlatform,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Platform opener command and the arguments preceding the URL
fn opener() -> Option<(&'static str, &'static [&'static str])> {
    if cfg!(target_os = "macos") {
        Some(("open", &[]))
    } else if cfg!(target_os = "windows") {
        Some(("cmd", &["/C", "start", ""]))
    } else if cfg!(unix) {
        Some(("xdg-open", &[]))
    } else {
        None
    }
}

fn parse(url: &str) -> Result<Url, BrowserError> {
    let parsed = Url::parse(url).map_err(|source| BrowserError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(BrowserError::UnsupportedScheme(other.to_string())),
    }
}

/// Spawn the platform opener without waiting for it
pub fn launch(url: &str) -> Result<(), BrowserError> {
    let url = parse(url)?;
    let (program, args) = opener().ok_or(BrowserError::UnsupportedPlatform)?;
    Command::new(program)
        .args(args)
        .arg(url.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
        .map_err(|source| BrowserError::Spawn { program, source })
}
