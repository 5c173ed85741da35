//! Server lifecycle: bind, announce, serve, and shut down on a signal

use crate::browser;
use crate::error::Result;
use crate::server::files::FileServer;
use crate::server::forwarder::ReverseProxyForwarder;
use crate::server::listener::Listener;
use crate::server::output::OutputSink;
use crate::server::pipeline::RequestPipeline;
use crate::server::record::RequestHistory;
use crate::server::serve::{HttpServer, SHUTDOWN_GRACE_PERIOD};
use crate::server::transport::{Binding, Transport};
use crate::server::types::{ResolvedAddresses, ServeMode, ServerConfiguration};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// Builds and runs the server described by a [`ServerConfiguration`]
pub struct Servant {
    config: ServerConfiguration,
    sink: Arc<dyn OutputSink>,
    quit: Arc<Notify>,
    grace_period: Duration,
}

impl Servant {
    /// `quit` stops the server like a termination signal does
    pub fn new(config: ServerConfiguration, sink: Arc<dyn OutputSink>, quit: Arc<Notify>) -> Self {
        Self {
            config,
            sink,
            quit,
            grace_period: SHUTDOWN_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn inner_handler(&self) -> Router {
        match self.config.mode {
            ServeMode::Local => FileServer::new(&self.config.path).into_router(),
            ServeMode::Remote => ReverseProxyForwarder::new(self.config.port).into_router(),
        }
    }

    /// Bind the transport and hand the resolved addresses to the sink.
    ///
    /// Every failure here is fatal: nothing is served on a listener that
    /// could not be fully set up.
    pub async fn init(self) -> Result<BoundServant> {
        self.config.validate()?;

        let pipeline = RequestPipeline::from_configuration(&self.config, Arc::clone(&self.sink));
        let history = pipeline.history();
        let handler = pipeline.apply_to_router(self.inner_handler());

        let mut transport = Transport::from_configuration(&self.config);
        let Binding {
            router,
            listener,
            addresses,
        } = transport.init(handler).await?;

        if self.config.auth.is_some() {
            debug!("Using basic authentication");
        }
        self.sink.init(&self.config.location(), &addresses);

        Ok(BoundServant {
            transport,
            server: HttpServer::new(router).with_grace_period(self.grace_period),
            listener,
            addresses,
            history,
            sink: self.sink,
            quit: self.quit,
            launch: self.config.launch,
        })
    }
}

/// A servant whose listener is bound and ready to serve
pub struct BoundServant {
    transport: Transport,
    server: HttpServer,
    listener: Listener,
    addresses: ResolvedAddresses,
    history: Arc<RequestHistory>,
    sink: Arc<dyn OutputSink>,
    quit: Arc<Notify>,
    launch: bool,
}

impl BoundServant {
    pub fn addresses(&self) -> &ResolvedAddresses {
        &self.addresses
    }

    pub fn history(&self) -> Arc<RequestHistory> {
        Arc::clone(&self.history)
    }

    /// Serve until an interrupt, a termination request or a quit notification
    pub async fn serve(self) -> Result<()> {
        let quit = Arc::clone(&self.quit);
        self.serve_until(termination_signal(quit)).await
    }

    /// Serve until `signal` resolves, then shut down within the grace period
    pub async fn serve_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut task = tokio::spawn(
            self.transport
                .start(self.server, self.listener, shutdown_rx),
        );

        if self.launch {
            launch_browser(&self.addresses);
        }

        let outcome = tokio::select! {
            _ = signal => {
                debug!("Signal caught, shutting down");
                // the server task owns the receiver until it returns
                let _ = shutdown_tx.send(true);
                (&mut task).await
            }
            finished = &mut task => finished,
        };
        self.sink.close();

        match outcome {
            Ok(Ok(())) => {
                info!("Server stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "Server shutdown failed");
                Err(e.into())
            }
            Err(e) => {
                error!(error = %e, "Server task failed");
                Err(e.into())
            }
        }
    }
}

fn launch_browser(addresses: &ResolvedAddresses) {
    let Some(address) = addresses.default_address() else {
        return;
    };
    debug!(url = %address, "Launching default browser");
    if let Err(e) = browser::launch(address) {
        warn!(error = %e, "Failed to launch browser");
    }
}

/// Resolves on SIGINT, SIGTERM or a `quit` notification
pub async fn termination_signal(quit: Arc<Notify>) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => debug!(signal = "interrupt", "Signal received"),
        _ = terminate => debug!(signal = "terminate", "Signal received"),
        _ = quit.notified() => debug!("Quit requested"),
    }
}
