//! Type definitions shared by the transport, pipeline and lifecycle modules

use derive_more::Display;
use nutype::nutype;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default relay used to expose servers publicly.
pub const DEFAULT_TUNNEL_HOST: &str = "https://localtunnel.me";

/// Which inner handler sits behind the request pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServeMode {
    /// Serve a directory tree from disk.
    #[default]
    Local,
    /// Relay tunnel traffic to a backend listening on `localhost:<port>`.
    Remote,
}

/// URL scheme the server is reachable with
#[derive(Clone, Copy, Debug, Display, Default, PartialEq, Eq)]
pub enum Schema {
    #[default]
    #[display("http")]
    Http,
    #[display("https")]
    Https,
}

/// Subdomain requested from the tunnel relay
#[nutype(
    sanitize(trim, lowercase),
    validate(predicate = |s: &str| {
        !s.is_empty()
            && s.len() <= 63
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }),
    derive(Clone, Debug, Display, PartialEq, Eq, AsRef, Serialize, Deserialize),
)]
pub struct Subdomain(String);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("auth must be in the form user:password")]
    MalformedCredentials,

    #[error("cert-file and key-file must be provided together")]
    IncompleteCertificate,

    #[error("auto-tls cannot be combined with cert-file/key-file")]
    ConflictingTls,

    #[error("expose cannot be combined with TLS, the tunnel terminates TLS")]
    ExposeWithTls,

    #[error("a backend port is required in remote mode")]
    MissingBackendPort,

    #[error("invalid subdomain: {0}")]
    InvalidSubdomain(String),
}

/// Basic-auth credential pair, parsed from `user:password`.
///
/// The string is split once on the first `:`, so passwords may contain colons.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl FromStr for Credentials {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once(':')
            .map(|(username, password)| Self::new(username, password))
            .ok_or(ConfigurationError::MalformedCredentials)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// TLS settings as requested by the user
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsRequest {
    pub auto: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

impl TlsRequest {
    pub fn wants_auto_tls(&self) -> bool {
        self.auto
    }

    pub fn wants_tls(&self) -> bool {
        self.wants_auto_tls() || (self.cert_file.is_some() && self.key_file.is_some())
    }
}

/// Certificate material the local transport serves with.
///
/// Exactly one source is active at a time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TlsMaterial {
    #[default]
    Absent,
    AutoGenerated {
        cert_file: PathBuf,
        key_file: PathBuf,
    },
    Provided {
        cert_file: PathBuf,
        key_file: PathBuf,
    },
}

impl TlsMaterial {
    pub fn schema(&self) -> Schema {
        match self {
            Self::Absent => Schema::Http,
            Self::AutoGenerated { .. } | Self::Provided { .. } => Schema::Https,
        }
    }

    /// Certificate and key paths, if TLS is active
    pub fn files(&self) -> Option<(&PathBuf, &PathBuf)> {
        match self {
            Self::Absent => None,
            Self::AutoGenerated {
                cert_file,
                key_file,
            }
            | Self::Provided {
                cert_file,
                key_file,
            } => Some((cert_file, key_file)),
        }
    }
}

/// Ordered list of URLs the server is reachable at.
///
/// The last entry is the default address used for browser launch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedAddresses(Vec<String>);

impl ResolvedAddresses {
    /// Build from `host:port` pairs, prefixing each with the schema
    pub fn from_hosts(schema: Schema, hosts: impl IntoIterator<Item = String>) -> Self {
        Self(
            hosts
                .into_iter()
                .map(|host| format!("{schema}://{host}"))
                .collect(),
        )
    }

    /// Build from URLs that already carry their scheme (tunnel endpoints)
    pub fn from_urls(urls: impl IntoIterator<Item = String>) -> Self {
        Self(urls.into_iter().collect())
    }

    pub fn default_address(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResolvedAddresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Everything the server needs to run; immutable once serving starts
#[derive(Clone, Debug)]
pub struct ServerConfiguration {
    pub mode: ServeMode,
    /// Directory served in local mode
    pub path: PathBuf,
    /// Empty means every interface
    pub host: String,
    /// Listen port in local mode, backend port in remote mode. Zero picks an ephemeral port.
    pub port: u16,
    pub cors: bool,
    pub launch: bool,
    pub auth: Option<Credentials>,
    pub tls: TlsRequest,
    /// Serve the directory through the tunnel instead of a local socket
    pub expose: bool,
    pub subdomain: Option<Subdomain>,
    pub tunnel_host: String,
    pub interactive: bool,
}

impl Default for ServerConfiguration {
    fn default() -> Self {
        Self {
            mode: ServeMode::Local,
            path: PathBuf::from("./"),
            host: String::new(),
            port: 0,
            cors: false,
            launch: false,
            auth: None,
            tls: TlsRequest::default(),
            expose: false,
            subdomain: None,
            tunnel_host: DEFAULT_TUNNEL_HOST.to_string(),
            interactive: false,
        }
    }
}

impl ServerConfiguration {
    /// Whether traffic arrives through the tunnel relay rather than a local socket
    pub fn uses_tunnel(&self) -> bool {
        self.mode == ServeMode::Remote || self.expose
    }

    /// Human readable description of what is being served
    pub fn location(&self) -> String {
        match self.mode {
            ServeMode::Local => self.path.display().to_string(),
            ServeMode::Remote => format!("localhost:{}", self.port),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(ConfigurationError::IncompleteCertificate);
        }
        if self.tls.auto && self.tls.cert_file.is_some() {
            return Err(ConfigurationError::ConflictingTls);
        }
        if self.uses_tunnel() && self.tls.wants_tls() {
            return Err(ConfigurationError::ExposeWithTls);
        }
        if self.mode == ServeMode::Remote && self.port == 0 {
            return Err(ConfigurationError::MissingBackendPort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("user:pass", "user", "pass")]
    #[case("user:pa:ss", "user", "pa:ss")]
    #[case(":", "", "")]
    #[case("admin:", "admin", "")]
    fn test_credentials_split_once(
        #[case] raw: &str,
        #[case] username: &str,
        #[case] password: &str,
    ) {
        let credentials: Credentials = raw.parse().unwrap();
        assert_eq!(credentials.username(), username);
        assert_eq!(credentials.password(), password);
    }

    #[test]
    fn test_credentials_without_colon_are_rejected() {
        assert_eq!(
            "userpass".parse::<Credentials>(),
            Err(ConfigurationError::MalformedCredentials)
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials::new("alice", "s3cret");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_tls_request() {
        assert!(!TlsRequest::default().wants_tls());

        let auto = TlsRequest {
            auto: true,
            ..TlsRequest::default()
        };
        assert!(auto.wants_tls());
        assert!(auto.wants_auto_tls());

        let provided = TlsRequest {
            auto: false,
            cert_file: Some("cert.pem".into()),
            key_file: Some("key.pem".into()),
        };
        assert!(provided.wants_tls());
        assert!(!provided.wants_auto_tls());
    }

    #[test]
    fn test_tls_material_schema() {
        assert_eq!(TlsMaterial::Absent.schema(), Schema::Http);
        assert!(TlsMaterial::Absent.files().is_none());

        let material = TlsMaterial::Provided {
            cert_file: "c".into(),
            key_file: "k".into(),
        };
        assert_eq!(material.schema(), Schema::Https);
        assert!(material.files().is_some());
    }

    #[test]
    fn test_resolved_addresses_default_is_last() {
        let addresses = ResolvedAddresses::from_hosts(
            Schema::Https,
            ["127.0.0.1:8080".to_string(), "192.168.1.2:8080".to_string()],
        );
        assert_eq!(addresses.len(), 2);
        assert_eq!(
            addresses.default_address(),
            Some("https://192.168.1.2:8080")
        );
        assert_eq!(
            addresses.to_string(),
            "https://127.0.0.1:8080, https://192.168.1.2:8080"
        );
    }

    #[test]
    fn test_subdomain_validation() {
        assert_eq!(
            Subdomain::try_new(" My-Site ").unwrap().as_ref(),
            "my-site"
        );
        assert!(Subdomain::try_new("").is_err());
        assert!(Subdomain::try_new("has.dot").is_err());
    }

    #[rstest]
    #[case::incomplete_cert(
        ServerConfiguration {
            tls: TlsRequest { auto: false, cert_file: Some("c".into()), key_file: None },
            ..ServerConfiguration::default()
        },
        ConfigurationError::IncompleteCertificate
    )]
    #[case::auto_and_files(
        ServerConfiguration {
            tls: TlsRequest { auto: true, cert_file: Some("c".into()), key_file: Some("k".into()) },
            ..ServerConfiguration::default()
        },
        ConfigurationError::ConflictingTls
    )]
    #[case::expose_with_tls(
        ServerConfiguration {
            expose: true,
            tls: TlsRequest { auto: true, ..TlsRequest::default() },
            ..ServerConfiguration::default()
        },
        ConfigurationError::ExposeWithTls
    )]
    #[case::remote_without_port(
        ServerConfiguration { mode: ServeMode::Remote, ..ServerConfiguration::default() },
        ConfigurationError::MissingBackendPort
    )]
    fn test_invalid_configurations(
        #[case] config: ServerConfiguration,
        #[case] expected: ConfigurationError,
    ) {
        assert_eq!(config.validate(), Err(expected));
    }

    #[test]
    fn test_default_configuration_is_valid() {
        let config = ServerConfiguration::default();
        assert!(config.validate().is_ok());
        assert!(!config.uses_tunnel());
        assert_eq!(config.location(), "./");
    }
}
