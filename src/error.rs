use crate::config::SettingsError;
use crate::server::serve::ServeError;
use crate::server::transport::TransportError;
use crate::server::types::ConfigurationError;
use thiserror::Error;

/// Servant application error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server error: {0}")]
    Serve(#[from] ServeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the failure was caused by user input rather than the environment
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Settings(SettingsError::Invalid(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
