//! Transports decide where connections come from
//!
//! Both variants share the same two steps: `init` binds a listener and
//! resolves the addresses it is reachable at, `start` serves on it until the
//! shutdown signal fires.

pub mod local;
pub mod remote;

pub use local::LocalTransport;
pub use remote::{RemoteTransport, TunnelClient, TunnelError, TunnelListener, TunnelRegistration};

use crate::server::certificate::CertificateError;
use crate::server::listener::Listener;
use crate::server::serve::{HttpServer, ServeError};
use crate::server::tls::TlsError;
use crate::server::types::{ResolvedAddresses, ServerConfiguration};
use axum::Router;
use std::io;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("address {address} is unavailable: {source}")]
    AddressUnavailable {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read the listener address: {0}")]
    LocalAddress(#[source] io::Error),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

/// Output of [`Transport::init`]
pub struct Binding {
    /// Catch-all router wrapping the inner handler
    pub router: Router,
    pub listener: Listener,
    pub addresses: ResolvedAddresses,
}

pub enum Transport {
    Local(LocalTransport),
    Remote(RemoteTransport),
}

impl Transport {
    /// Tunnel-backed when serving remotely or exposing a directory
    pub fn from_configuration(config: &ServerConfiguration) -> Self {
        if config.uses_tunnel() {
            Self::Remote(RemoteTransport::new(config))
        } else {
            Self::Local(LocalTransport::new(config))
        }
    }

    pub async fn init(&mut self, handler: Router) -> Result<Binding, TransportError> {
        let router = Router::new().fallback_service(handler);
        let (listener, addresses) = match self {
            Self::Local(local) => local.init().await?,
            Self::Remote(remote) => remote.init().await?,
        };
        Ok(Binding {
            router,
            listener,
            addresses,
        })
    }

    /// Blocks until shutdown completes or serving fails
    pub async fn start(
        self,
        server: HttpServer,
        listener: Listener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServeError> {
        match self {
            Self::Local(local) => local.start(server, listener, shutdown).await,
            Self::Remote(remote) => remote.start(server, listener, shutdown).await,
        }
    }
}
