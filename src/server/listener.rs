//! Source of inbound connections, either a bound socket or a tunnel

use crate::server::transport::remote::TunnelListener;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::OwnedSemaphorePermit;

/// An accepted connection, ready for the HTTP server
pub struct Accepted {
    pub stream: TcpStream,
    pub remote_address: String,
    /// Held for as long as a tunnel connection lives, frees a relay slot when dropped
    pub permit: Option<OwnedSemaphorePermit>,
}

pub enum Listener {
    Tcp(TcpListener),
    Tunnel(TunnelListener),
}

impl Listener {
    /// Wait for the next connection.
    ///
    /// `BrokenPipe` means the listener is gone for good.
    pub async fn accept(&mut self) -> io::Result<Accepted> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok(Accepted {
                    stream,
                    remote_address: peer.to_string(),
                    permit: None,
                })
            }
            Self::Tunnel(listener) => listener.accept().await,
        }
    }

    /// Local socket address, tunnels have none
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            Self::Tunnel(_) => None,
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Self::Tcp(listener)
    }
}

impl From<TunnelListener> for Listener {
    fn from(listener: TunnelListener) -> Self {
        Self::Tunnel(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_accept_reports_peer() {
        let mut listener = Listener::from(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept().await.unwrap();
        assert_eq!(
            accepted.remote_address,
            client.local_addr().unwrap().to_string()
        );
        assert!(accepted.permit.is_none());
    }
}
