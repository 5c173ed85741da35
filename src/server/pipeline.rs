//! Request pipeline builder
//!
//! Composes the middleware around the inner handler. From outer to inner:
//! 1. HTTP tracing
//! 2. Basic auth gate (only with credentials configured)
//! 3. CORS headers (only when enabled)
//! 4. Instrumentation, which records every request that got past the gate

use crate::server::middleware::{
    basic_auth_middleware, cors_middleware, instrumentation_middleware, AuthConfig,
    Instrumentation,
};
use crate::server::output::OutputSink;
use crate::server::record::RequestHistory;
use crate::server::types::{Credentials, ServerConfiguration};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct RequestPipeline {
    instrumentation: Arc<Instrumentation>,
    cors: bool,
    auth: Option<Arc<AuthConfig>>,
}

impl RequestPipeline {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            instrumentation: Arc::new(Instrumentation {
                history: Arc::new(RequestHistory::new()),
                sink,
            }),
            cors: false,
            auth: None,
        }
    }

    pub fn from_configuration(config: &ServerConfiguration, sink: Arc<dyn OutputSink>) -> Self {
        Self::new(sink)
            .with_cors(config.cors)
            .with_auth(config.auth.as_ref())
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.cors = enabled;
        self
    }

    pub fn with_auth(mut self, credentials: Option<&Credentials>) -> Self {
        self.auth = credentials.map(|credentials| Arc::new(AuthConfig::new(credentials)));
        self
    }

    /// History shared with the instrumentation layer
    pub fn history(&self) -> Arc<RequestHistory> {
        Arc::clone(&self.instrumentation.history)
    }

    pub fn apply_to_router<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // innermost first
        let mut router = router.layer(from_fn_with_state(
            self.instrumentation,
            instrumentation_middleware,
        ));
        if self.cors {
            router = router.layer(from_fn(cors_middleware));
        }
        if let Some(auth_config) = self.auth {
            router = router.layer(from_fn_with_state(auth_config, basic_auth_middleware));
        }
        router.layer(TraceLayer::new_for_http())
    }
}
