//! Servant - expose a local directory over HTTP in a jiffy
//!
//! Serves a directory tree (optionally over TLS, behind basic auth, or through
//! a public tunnel) or relays tunnel traffic to a server on localhost, and
//! reports every request to an output sink as it completes.

pub mod browser;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod updates;

pub use build_info::BuildInfo;
pub use error::{Error, Result};
pub use server::{Servant, ServerConfiguration};
