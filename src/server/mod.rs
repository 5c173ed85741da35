//! HTTP serving core: transports, request pipeline, proxying and lifecycle

pub mod certificate;
pub mod files;
pub mod forwarder;
pub mod lifecycle;
pub mod listener;
pub mod middleware;
pub mod network;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod recording_body;
pub mod serve;
pub mod tls;
pub mod transport;
pub mod types;

pub use certificate::{generate_auto_tls, CertificateError};
pub use files::FileServer;
pub use forwarder::ReverseProxyForwarder;
pub use lifecycle::{termination_signal, BoundServant, Servant};
pub use listener::{Accepted, Listener};
pub use output::{InteractiveSink, LogSink, OutputSink};
pub use pipeline::RequestPipeline;
pub use record::{RemoteAddress, RequestHistory, RequestRecord};
pub use serve::{HttpServer, ServeError, SHUTDOWN_GRACE_PERIOD};
pub use tls::TlsError;
pub use transport::{Transport, TransportError, TunnelError};
pub use types::{
    ConfigurationError, Credentials, ResolvedAddresses, Schema, ServeMode, ServerConfiguration,
    Subdomain, TlsMaterial, TlsRequest, DEFAULT_TUNNEL_HOST,
};
