//! Layered settings: defaults, then `.servant.yaml`, then `SERVANT__*` env vars
//!
//! Command line flags are applied on top by [`crate::cli`].

use crate::server::types::{ConfigurationError, DEFAULT_TUNNEL_HOST};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "SERVANT";
pub const CONFIG_NAME: &str = ".servant";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub local: LocalSettings,
    pub remote: RemoteSettings,
    pub tunnel: TunnelSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalSettings {
    pub path: PathBuf,
    pub host: String,
    pub port: u16,
    pub cors: bool,
    pub launch: bool,
    pub expose: bool,
    pub auth: Option<String>,
    pub subdomain: Option<String>,
    pub auto_tls: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteSettings {
    pub port: u16,
    pub subdomain: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TunnelSettings {
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputSettings {
    pub disable_tui: bool,
    pub check_updates: bool,
}

impl Settings {
    /// Load settings, reading `config_file` if given, otherwise the optional
    /// `$HOME/.servant.yaml` and `./.servant.yaml` (the latter wins)
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("local.path", "./")?
            .set_default("local.host", "")?
            .set_default("local.port", 0)?
            .set_default("local.cors", false)?
            .set_default("local.launch", false)?
            .set_default("local.expose", false)?
            .set_default("local.auto_tls", false)?
            .set_default("remote.port", 0)?
            .set_default("tunnel.host", DEFAULT_TUNNEL_HOST)?
            .set_default("output.disable_tui", false)?
            .set_default("output.check_updates", true)?;

        match config_file {
            Some(path) => {
                debug!(config = %path.display(), "Using config file");
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                if let Some(home) = env::var_os("HOME") {
                    let home_config = PathBuf::from(home).join(CONFIG_NAME);
                    builder = builder.add_source(
                        File::new(&home_config.to_string_lossy(), FileFormat::Yaml)
                            .required(false),
                    );
                }
                builder =
                    builder.add_source(File::new(CONFIG_NAME, FileFormat::Yaml).required(false));
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
