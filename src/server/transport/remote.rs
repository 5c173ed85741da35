//! Remote transport: public traffic arrives through a localtunnel relay
//!
//! Registration asks the relay for a public URL and a relay port. The
//! listener then keeps up to `max_conn_count` TCP connections open to that
//! port; each one carries the HTTP traffic of a public client and is handed
//! to the server like any accepted socket. A slot is re-dialed as soon as its
//! connection ends.

use super::TransportError;
use crate::server::listener::{Accepted, Listener};
use crate::server::serve::{HttpServer, ServeError};
use crate::server::types::{ResolvedAddresses, ServerConfiguration, Subdomain};
use reqwest::Url;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Relay connections kept open when the relay does not say otherwise
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

const REDIAL_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("invalid tunnel host '{0}'")]
    InvalidHost(String),

    #[error("tunnel registration failed: {0}")]
    Registration(#[from] reqwest::Error),
}

/// Reply of the relay to a registration request
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TunnelRegistration {
    pub id: String,
    pub port: u16,
    #[serde(default)]
    pub max_conn_count: Option<usize>,
    pub url: String,
    /// Relay address, when it differs from the registration host
    #[serde(default)]
    pub ip: Option<String>,
}

impl TunnelRegistration {
    pub fn max_connections(&self) -> usize {
        self.max_conn_count
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1)
    }
}

/// Transport whose listener is provided by the tunnel relay; the relay terminates TLS
#[derive(Clone, Debug)]
pub struct RemoteTransport {
    tunnel_host: String,
    subdomain: Option<Subdomain>,
}

impl RemoteTransport {
    pub fn new(config: &ServerConfiguration) -> Self {
        Self {
            tunnel_host: config.tunnel_host.clone(),
            subdomain: config.subdomain.clone(),
        }
    }

    pub async fn init(&mut self) -> Result<(Listener, ResolvedAddresses), TransportError> {
        let client = TunnelClient::new(&self.tunnel_host)?;
        let listener = client.listen(self.subdomain.as_ref()).await?;
        let addresses = listener.addresses();
        Ok((listener.into(), addresses))
    }

    pub async fn start(
        self,
        server: HttpServer,
        listener: Listener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServeError> {
        server.serve(listener, shutdown).await
    }
}

/// HTTP client for the relay's registration endpoint
#[derive(Clone, Debug)]
pub struct TunnelClient {
    http: reqwest::Client,
    host: Url,
}

impl TunnelClient {
    pub fn new(host: &str) -> Result<Self, TunnelError> {
        let host = Url::parse(host).map_err(|_| TunnelError::InvalidHost(host.to_string()))?;
        if host.host_str().is_none() {
            return Err(TunnelError::InvalidHost(host.to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("servant/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, host })
    }

    /// `<host>/<subdomain>` for a named tunnel, `<host>/?new` otherwise
    pub fn registration_url(&self, subdomain: Option<&Subdomain>) -> String {
        let base = self.host.as_str().trim_end_matches('/');
        match subdomain {
            Some(subdomain) => format!("{base}/{subdomain}"),
            None => format!("{base}/?new"),
        }
    }

    pub async fn register(
        &self,
        subdomain: Option<&Subdomain>,
    ) -> Result<TunnelRegistration, TunnelError> {
        let url = self.registration_url(subdomain);
        debug!(url = %url, "Registering tunnel");
        let registration = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<TunnelRegistration>()
            .await?;
        info!(
            id = %registration.id,
            url = %registration.url,
            max_connections = registration.max_connections(),
            "Tunnel registered"
        );
        Ok(registration)
    }

    /// Register and start keeping relay connections open
    pub async fn listen(&self, subdomain: Option<&Subdomain>) -> Result<TunnelListener, TunnelError> {
        let registration = self.register(subdomain).await?;
        let relay_host = match &registration.ip {
            Some(ip) => ip.clone(),
            None => self
                .host
                .host_str()
                .map(str::to_string)
                .ok_or_else(|| TunnelError::InvalidHost(self.host.to_string()))?,
        };
        Ok(TunnelListener::start(relay_host, registration))
    }
}

/// Connections opened towards the relay, surfaced as accepted sockets
pub struct TunnelListener {
    registration: TunnelRegistration,
    connections: mpsc::Receiver<(TcpStream, OwnedSemaphorePermit)>,
    dialer: JoinHandle<()>,
}

impl TunnelListener {
    pub fn start(relay_host: String, registration: TunnelRegistration) -> Self {
        let max_connections = registration.max_connections();
        let (sender, connections) = mpsc::channel(max_connections);
        let slots = Arc::new(Semaphore::new(max_connections));
        let dialer = tokio::spawn(dial_relay(relay_host, registration.port, slots, sender));
        Self {
            registration,
            connections,
            dialer,
        }
    }

    /// The public URL is the only address a tunnel is reachable at
    pub fn addresses(&self) -> ResolvedAddresses {
        ResolvedAddresses::from_urls([self.registration.url.clone()])
    }

    pub async fn accept(&mut self) -> io::Result<Accepted> {
        let (stream, permit) = self.connections.recv().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "tunnel listener closed")
        })?;
        let remote_address = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| self.registration.url.clone());
        Ok(Accepted {
            stream,
            remote_address,
            permit: Some(permit),
        })
    }
}

impl Drop for TunnelListener {
    fn drop(&mut self) {
        self.dialer.abort();
    }
}

async fn dial_relay(
    host: String,
    port: u16,
    slots: Arc<Semaphore>,
    sender: mpsc::Sender<(TcpStream, OwnedSemaphorePermit)>,
) {
    loop {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            return;
        };
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                debug!(host = %host, port, "Relay connection opened");
                if sender.send((stream, permit)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, host = %host, port, "Failed to connect to the tunnel relay");
                drop(permit);
                tokio::time::sleep(REDIAL_DELAY).await;
            }
        }
    }
}
