//! Background check for a newer published release

use crate::build_info::BuildInfo;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const LATEST_RELEASE_URL: &str = "https://api.github.com/repos/planta7/servant/releases/latest";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("release request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

pub struct UpdateChecker {
    http: reqwest::Client,
    releases_url: String,
}

impl UpdateChecker {
    pub fn new(releases_url: impl Into<String>) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("servant/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            releases_url: releases_url.into(),
        })
    }

    /// Latest published version, without the leading `v`
    pub async fn latest_version(&self) -> Result<String, UpdateError> {
        let release: LatestRelease = self
            .http
            .get(&self.releases_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(strip_tag_prefix(&release.tag_name).to_string())
    }

    /// Log a notice when the published release differs from `build`
    pub async fn check(&self, build: &BuildInfo) {
        match self.latest_version().await {
            Ok(latest) => match newer_release(build.version(), &latest) {
                Some(latest) => info!(
                    current = build.version(),
                    latest,
                    "A new version of servant is available"
                ),
                None => debug!(version = build.version(), "Running the latest version"),
            },
            Err(e) => warn!(error = %e, "Failed to check for updates"),
        }
    }
}

fn strip_tag_prefix(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// The published version if it differs from the running one
pub fn newer_release<'a>(current: &str, latest: &'a str) -> Option<&'a str> {
    let latest = strip_tag_prefix(latest.trim());
    (!latest.is_empty() && latest != strip_tag_prefix(current)).then_some(latest)
}

/// Fire-and-forget update check against the public release feed
pub fn spawn_check(build: BuildInfo) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match UpdateChecker::new(LATEST_RELEASE_URL) {
            Ok(checker) => checker.check(&build).await,
            Err(e) => warn!(error = %e, "Failed to build the update client"),
        }
    })
}
