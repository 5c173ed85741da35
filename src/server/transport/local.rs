//! Local transport: a TCP socket bound on this machine, optionally with TLS

use super::TransportError;
use crate::server::certificate::generate_auto_tls;
use crate::server::listener::Listener;
use crate::server::network::{classify_bind_error, host_port, resolve_hosts};
use crate::server::serve::{HttpServer, ServeError};
use crate::server::tls::create_tls_acceptor;
use crate::server::types::{ResolvedAddresses, ServerConfiguration, TlsMaterial, TlsRequest};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

const ALL_INTERFACES: &str = "0.0.0.0";

#[derive(Clone)]
pub struct LocalTransport {
    host: String,
    port: u16,
    tls_request: TlsRequest,
    tls: TlsMaterial,
    acceptor: Option<TlsAcceptor>,
}

impl LocalTransport {
    pub fn new(config: &ServerConfiguration) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            tls_request: config.tls.clone(),
            tls: TlsMaterial::Absent,
            acceptor: None,
        }
    }

    /// Material resolved by `init`
    pub fn tls(&self) -> &TlsMaterial {
        &self.tls
    }

    fn bind_address(&self) -> String {
        let host = if self.host.is_empty() {
            ALL_INTERFACES
        } else {
            self.host.as_str()
        };
        host_port(host, self.port)
    }

    /// Bind exactly once, then settle TLS material and the advertised addresses
    pub async fn init(&mut self) -> Result<(Listener, ResolvedAddresses), TransportError> {
        let address = self.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| classify_bind_error(&address, e))?;
        // port 0 is replaced by whatever the OS picked
        let port = listener
            .local_addr()
            .map_err(TransportError::LocalAddress)?
            .port();
        debug!(address = %address, port, "Listener bound");

        self.tls = resolve_tls(&self.tls_request)?;
        if let Some((cert_file, key_file)) = self.tls.files() {
            self.acceptor = Some(create_tls_acceptor(cert_file, key_file)?);
        }

        let addresses =
            ResolvedAddresses::from_hosts(self.tls.schema(), resolve_hosts(&self.host, port));
        Ok((Listener::Tcp(listener), addresses))
    }

    pub async fn start(
        self,
        server: HttpServer,
        listener: Listener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServeError> {
        let server = match self.acceptor {
            Some(acceptor) => server.with_tls(acceptor),
            None => server,
        };
        server.serve(listener, shutdown).await
    }
}

fn resolve_tls(request: &TlsRequest) -> Result<TlsMaterial, TransportError> {
    if request.wants_auto_tls() {
        debug!("Generating self-signed certificate and key");
        let (cert_file, key_file) = generate_auto_tls()?;
        return Ok(TlsMaterial::AutoGenerated {
            cert_file,
            key_file,
        });
    }
    match (&request.cert_file, &request.key_file) {
        (Some(cert_file), Some(key_file)) => {
            debug!(cert = %cert_file.display(), key = %key_file.display(), "Using an external certificate and key");
            Ok(TlsMaterial::Provided {
                cert_file: cert_file.clone(),
                key_file: key_file.clone(),
            })
        }
        _ => Ok(TlsMaterial::Absent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::types::Schema;

    fn transport(host: &str, port: u16, tls: TlsRequest) -> LocalTransport {
        LocalTransport::new(&ServerConfiguration {
            host: host.to_string(),
            port,
            tls,
            ..ServerConfiguration::default()
        })
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(transport("", 80, TlsRequest::default()).bind_address(), "0.0.0.0:80");
        assert_eq!(transport("::1", 80, TlsRequest::default()).bind_address(), "[::1]:80");
        assert_eq!(
            transport("localhost", 8080, TlsRequest::default()).bind_address(),
            "localhost:8080"
        );
    }

    #[tokio::test]
    async fn test_ephemeral_port_is_resolved() {
        let mut local = transport("127.0.0.1", 0, TlsRequest::default());
        let (listener, addresses) = local.init().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(
            addresses.iter().collect::<Vec<_>>(),
            vec![format!("http://127.0.0.1:{port}")]
        );
        assert_eq!(local.tls(), &TlsMaterial::Absent);
    }

    #[tokio::test]
    async fn test_auto_tls_switches_schema() {
        let mut local = transport(
            "127.0.0.1",
            0,
            TlsRequest {
                auto: true,
                ..TlsRequest::default()
            },
        );
        let (_, addresses) = local.init().await.unwrap();
        assert_eq!(local.tls().schema(), Schema::Https);
        assert!(matches!(local.tls(), TlsMaterial::AutoGenerated { .. }));
        assert!(addresses.iter().all(|a| a.starts_with("https://")));
        assert!(local.acceptor.is_some());
    }

    #[tokio::test]
    async fn test_second_bind_on_same_port_is_unavailable() {
        let mut first = transport("127.0.0.1", 0, TlsRequest::default());
        let (listener, _) = first.init().await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut second = transport("127.0.0.1", port, TlsRequest::default());
        assert!(matches!(
            second.init().await,
            Err(TransportError::AddressUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_certificate_files_fail() {
        let mut local = transport(
            "127.0.0.1",
            0,
            TlsRequest {
                auto: false,
                cert_file: Some("/nonexistent/cert.pem".into()),
                key_file: Some("/nonexistent/key.pem".into()),
            },
        );
        assert!(matches!(local.init().await, Err(TransportError::Tls(_))));
    }
}
