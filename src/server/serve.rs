//! HTTP connection loop with bounded graceful shutdown
//!
//! Every accepted connection runs on its own task. Once the shutdown signal
//! flips, no new connections are accepted, open connections are asked to
//! finish their in-flight request, and whatever is still running after the
//! grace period is aborted.

use crate::server::listener::{Accepted, Listener};
use crate::server::record::RemoteAddress;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// How long in-flight requests may run after shutdown was requested
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("listener closed unexpectedly")]
    ListenerClosed,

    #[error("in-flight requests did not finish within {0:?}, connections were force-closed")]
    GracePeriodExceeded(Duration),

    #[error("server task failed: {0}")]
    Task(#[from] JoinError),
}

/// Router plus optional TLS termination
#[derive(Clone)]
pub struct HttpServer {
    router: Router,
    tls: Option<TlsAcceptor>,
    grace_period: Duration,
}

impl HttpServer {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            tls: None,
            grace_period: SHUTDOWN_GRACE_PERIOD,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Serve until `shutdown` turns true (or its sender is dropped)
    pub async fn serve(
        self,
        mut listener: Listener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServeError> {
        let connection_shutdown = shutdown.clone();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => {
                        connections.spawn(serve_connection(
                            self.router.clone(),
                            self.tls.clone(),
                            accepted,
                            connection_shutdown.clone(),
                        ));
                    }
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        return Err(ServeError::ListenerClosed);
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        // stop accepting before draining
        drop(listener);
        info!(
            in_flight = connections.len(),
            grace_period = ?self.grace_period,
            "Shutting down"
        );

        let drained = tokio::time::timeout(self.grace_period, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "Grace period exceeded, closing remaining connections"
            );
            connections.abort_all();
            return Err(ServeError::GracePeriodExceeded(self.grace_period));
        }
        debug!("Shutdown completed");
        Ok(())
    }
}

/// Resolves once shutdown is requested; a dropped sender counts as a request
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn serve_connection(
    router: Router,
    tls: Option<TlsAcceptor>,
    accepted: Accepted,
    shutdown: watch::Receiver<bool>,
) {
    let Accepted {
        stream,
        remote_address,
        permit,
    } = accepted;
    let _permit = permit;

    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => drive(router, stream, remote_address, shutdown).await,
            Err(e) => debug!(error = %e, remote = %remote_address, "TLS handshake failed"),
        },
        None => drive(router, stream, remote_address, shutdown).await,
    }
}

async fn drive<I>(router: Router, io: I, remote_address: String, mut shutdown: watch::Receiver<bool>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request
            .extensions_mut()
            .insert(RemoteAddress(remote_address.clone()));
        router.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!(error = %e, "Connection closed with error");
                }
                break;
            }
            _ = stopped(&mut shutdown), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    async fn start(
        router: Router,
        grace_period: Duration,
    ) -> (
        SocketAddr,
        watch::Sender<bool>,
        JoinHandle<Result<(), ServeError>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = HttpServer::new(router).with_grace_period(grace_period);
        let handle = tokio::spawn(server.serve(Listener::Tcp(listener), rx));
        (addr, tx, handle)
    }

    fn sleepy(delay: Duration) -> Router {
        Router::new().route(
            "/slow",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "done"
            }),
        )
    }

    #[tokio::test]
    async fn test_in_flight_request_completes_during_shutdown() {
        let (addr, tx, handle) = start(sleepy(Duration::from_secs(1)), SHUTDOWN_GRACE_PERIOD).await;

        let request = tokio::spawn(async move {
            reqwest::get(format!("http://{addr}/slow"))
                .await?
                .text()
                .await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        assert_eq!(request.await.unwrap().unwrap(), "done");
        handle.await.unwrap().unwrap();

        // the listener is gone once serve returned
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_grace_period_exceeded_is_reported() {
        let (addr, tx, handle) =
            start(sleepy(Duration::from_secs(30)), Duration::from_millis(200)).await;

        let request = tokio::spawn(async move { reqwest::get(format!("http://{addr}/slow")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ServeError::GracePeriodExceeded(_))));
        assert!(request.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_idle_server_stops_immediately() {
        let (_, tx, handle) = start(sleepy(Duration::ZERO), SHUTDOWN_GRACE_PERIOD).await;
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
