//! Command line surface
//!
//! Flags given here take precedence over [`Settings`]; the merge yields the
//! immutable [`ServerConfiguration`] the server runs with.

use crate::config::Settings;
use crate::server::types::{
    ConfigurationError, Credentials, ServeMode, ServerConfiguration, Subdomain, TlsRequest,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "servant", version, about, long_about = None)]
pub struct Cli {
    /// Config file (default is $HOME/.servant.yaml or ./.servant.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print plain request lines instead of the interactive view
    #[arg(long, global = true)]
    pub disable_tui: bool,

    /// Skip the check for a newer release
    #[arg(long, global = true)]
    pub no_update_check: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a local directory
    Local(LocalArgs),
    /// Expose a server running on localhost through a public tunnel
    Remote(RemoteArgs),
}

#[derive(Args, Debug, Default)]
pub struct LocalArgs {
    /// Directory to serve [default: ./]
    pub path: Option<PathBuf>,

    /// Interface to listen on, all interfaces when empty
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on, random when omitted
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Serve through a public tunnel instead of a local socket
    #[arg(short, long)]
    pub expose: bool,

    /// Subdomain to request from the tunnel (with --expose)
    #[arg(short, long, requires = "expose")]
    pub subdomain: Option<String>,

    /// Allow cross-origin requests
    #[arg(short, long)]
    pub cors: bool,

    /// Open the default browser once serving
    #[arg(short, long)]
    pub launch: bool,

    /// Basic authentication, in the form user:password
    #[arg(long, value_name = "USER:PASSWORD")]
    pub auth: Option<String>,

    /// Serve over TLS with a generated self-signed certificate
    #[arg(long, conflicts_with_all = ["cert_file", "key_file"])]
    pub auto_tls: bool,

    /// PEM certificate to serve TLS with
    #[arg(long, requires = "key_file")]
    pub cert_file: Option<PathBuf>,

    /// PEM private key matching --cert-file
    #[arg(long, requires = "cert_file")]
    pub key_file: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct RemoteArgs {
    /// Local port of the server to expose
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Subdomain to request from the tunnel
    #[arg(short, long)]
    pub subdomain: Option<String>,
}

impl Cli {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }

    pub fn check_updates(&self, settings: &Settings) -> bool {
        !self.no_update_check && settings.output.check_updates
    }

    pub fn interactive(&self, settings: &Settings) -> bool {
        !(self.disable_tui || settings.output.disable_tui)
    }

    /// Merge flags over `settings` and validate the result
    pub fn configuration(
        &self,
        settings: &Settings,
    ) -> Result<ServerConfiguration, ConfigurationError> {
        let config = match &self.command {
            Command::Local(args) => local_configuration(args, settings)?,
            Command::Remote(args) => remote_configuration(args, settings)?,
        };
        let config = ServerConfiguration {
            interactive: self.interactive(settings),
            tunnel_host: settings.tunnel.host.clone(),
            ..config
        };
        config.validate()?;
        Ok(config)
    }
}

fn local_configuration(
    args: &LocalArgs,
    settings: &Settings,
) -> Result<ServerConfiguration, ConfigurationError> {
    let local = &settings.local;
    let auth = args
        .auth
        .as_deref()
        .or(local.auth.as_deref())
        .map(str::parse::<Credentials>)
        .transpose()?;

    Ok(ServerConfiguration {
        mode: ServeMode::Local,
        path: args.path.clone().unwrap_or_else(|| local.path.clone()),
        host: args.host.clone().unwrap_or_else(|| local.host.clone()),
        port: args.port.unwrap_or(local.port),
        cors: args.cors || local.cors,
        launch: args.launch || local.launch,
        auth,
        tls: TlsRequest {
            auto: args.auto_tls || local.auto_tls,
            cert_file: args.cert_file.clone().or_else(|| local.cert_file.clone()),
            key_file: args.key_file.clone().or_else(|| local.key_file.clone()),
        },
        expose: args.expose || local.expose,
        subdomain: subdomain(args.subdomain.as_deref().or(local.subdomain.as_deref()))?,
        ..ServerConfiguration::default()
    })
}

fn remote_configuration(
    args: &RemoteArgs,
    settings: &Settings,
) -> Result<ServerConfiguration, ConfigurationError> {
    let remote = &settings.remote;
    Ok(ServerConfiguration {
        mode: ServeMode::Remote,
        port: args.port.unwrap_or(remote.port),
        subdomain: subdomain(args.subdomain.as_deref().or(remote.subdomain.as_deref()))?,
        ..ServerConfiguration::default()
    })
}

fn subdomain(raw: Option<&str>) -> Result<Option<Subdomain>, ConfigurationError> {
    raw.map(|s| {
        Subdomain::try_new(s).map_err(|_| ConfigurationError::InvalidSubdomain(s.to_string()))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalSettings, OutputSettings, RemoteSettings, TunnelSettings};
    use crate::server::types::DEFAULT_TUNNEL_HOST;
    use clap::CommandFactory;

    fn settings() -> Settings {
        Settings {
            local: LocalSettings {
                path: PathBuf::from("./"),
                host: String::new(),
                port: 0,
                cors: false,
                launch: false,
                expose: false,
                auth: None,
                subdomain: None,
                auto_tls: false,
                cert_file: None,
                key_file: None,
            },
            remote: RemoteSettings {
                port: 0,
                subdomain: None,
            },
            tunnel: TunnelSettings {
                host: DEFAULT_TUNNEL_HOST.to_string(),
            },
            output: OutputSettings {
                disable_tui: false,
                check_updates: true,
            },
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_local_defaults() {
        let cli = parse(&["servant", "local"]);
        let config = cli.configuration(&settings()).unwrap();
        assert_eq!(config.mode, ServeMode::Local);
        assert_eq!(config.path, PathBuf::from("./"));
        assert_eq!(config.port, 0);
        assert!(config.interactive);
        assert!(config.auth.is_none());
        assert_eq!(cli.log_level(), "info");
    }

    #[test]
    fn test_local_flags() {
        let cli = parse(&[
            "servant", "-v", "--disable-tui", "local", "/srv/www", "-p", "8080", "-c", "-l",
            "--auth", "admin:pa:ss", "--auto-tls",
        ]);
        let config = cli.configuration(&settings()).unwrap();
        assert_eq!(config.path, PathBuf::from("/srv/www"));
        assert_eq!(config.port, 8080);
        assert!(config.cors && config.launch && config.tls.auto);
        assert!(!config.interactive);
        let auth = config.auth.unwrap();
        assert_eq!((auth.username(), auth.password()), ("admin", "pa:ss"));
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn test_flags_override_settings() {
        let mut settings = settings();
        settings.local.port = 9000;
        settings.local.cors = true;
        settings.local.auth = Some("file:user".to_string());

        let config = parse(&["servant", "local", "-p", "7000", "--auth", "cli:user"])
            .configuration(&settings)
            .unwrap();
        assert_eq!(config.port, 7000);
        assert!(config.cors);
        assert_eq!(config.auth.unwrap().username(), "cli");
    }

    #[test]
    fn test_malformed_auth_fails() {
        let result = parse(&["servant", "local", "--auth", "nocolon"]).configuration(&settings());
        assert_eq!(result.unwrap_err(), ConfigurationError::MalformedCredentials);
    }

    #[test]
    fn test_expose_with_subdomain() {
        let config = parse(&["servant", "local", "-e", "-s", "Demo"])
            .configuration(&settings())
            .unwrap();
        assert!(config.uses_tunnel());
        assert_eq!(config.subdomain.unwrap().as_ref(), "demo");
    }

    #[test]
    fn test_expose_with_tls_fails() {
        let result =
            parse(&["servant", "local", "-e", "--auto-tls"]).configuration(&settings());
        assert_eq!(result.unwrap_err(), ConfigurationError::ExposeWithTls);
    }

    #[test]
    fn test_cert_file_requires_key_file() {
        assert!(Cli::try_parse_from(["servant", "local", "--cert-file", "c.pem"]).is_err());
        assert!(Cli::try_parse_from([
            "servant", "local", "--auto-tls", "--cert-file", "c.pem", "--key-file", "k.pem"
        ])
        .is_err());
    }

    #[test]
    fn test_remote() {
        let config = parse(&["servant", "remote", "-p", "3000", "-s", "api"])
            .configuration(&settings())
            .unwrap();
        assert_eq!(config.mode, ServeMode::Remote);
        assert_eq!(config.port, 3000);
        assert_eq!(config.location(), "localhost:3000");
        assert_eq!(config.tunnel_host, DEFAULT_TUNNEL_HOST);
    }

    #[test]
    fn test_remote_requires_port() {
        let result = parse(&["servant", "remote"]).configuration(&settings());
        assert_eq!(result.unwrap_err(), ConfigurationError::MissingBackendPort);
    }

    #[test]
    fn test_invalid_subdomain() {
        let result = parse(&["servant", "remote", "-p", "3000", "-s", "a.b"])
            .configuration(&settings());
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::InvalidSubdomain("a.b".to_string())
        );
    }

    #[test]
    fn test_update_check_toggle() {
        let settings = settings();
        assert!(parse(&["servant", "local"]).check_updates(&settings));
        assert!(!parse(&["servant", "--no-update-check", "local"]).check_updates(&settings));
    }
}
