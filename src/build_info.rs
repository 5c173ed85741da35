//! Build and version metadata, captured once at startup and passed around

/// Length of the abbreviated commit hash shown to users
pub const SHORT_COMMIT_LEN: usize = 7;

const UNKNOWN_COMMIT: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildInfo {
    version: String,
    commit: String,
}

impl BuildInfo {
    pub fn new(version: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            commit: commit.into(),
        }
    }

    /// Metadata of the running binary; the commit comes from `SERVANT_COMMIT` at build time
    pub fn current() -> Self {
        Self::new(
            env!("CARGO_PKG_VERSION"),
            option_env!("SERVANT_COMMIT").unwrap_or(UNKNOWN_COMMIT),
        )
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn short_commit(&self) -> &str {
        match self.commit.char_indices().nth(SHORT_COMMIT_LEN) {
            Some((end, _)) => &self.commit[..end],
            None => &self.commit,
        }
    }
}
