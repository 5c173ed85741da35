//! PEM loading and TLS acceptor construction

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ServerConfig;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in '{0}'")]
    NoCertificates(PathBuf),

    #[error("no private key found in '{0}'")]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Config(#[from] rustls::Error),
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Load every certificate of a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    debug!(count = certs.len(), path = %path.display(), "Loaded certificates");
    Ok(certs)
}

/// Load the first PKCS#1, PKCS#8 or SEC1 private key of a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build an acceptor for a certificate chain and key on disk
pub fn create_tls_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(cert = %cert_file.display(), "Created TLS acceptor");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::certificate::issue_self_signed;
    use std::fs;

    #[test]
    fn test_acceptor_from_generated_material() {
        let dir = tempfile::tempdir().unwrap();
        let issued = issue_self_signed().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, issued.cert_pem).unwrap();
        fs::write(&key, issued.key_pem).unwrap();

        assert!(matches!(load_private_key(&key).unwrap(), PrivateKeyDer::Sec1(_)));
        assert_eq!(load_certs(&cert).unwrap().len(), 1);
        assert!(create_tls_acceptor(&cert, &key).is_ok());
    }

    #[test]
    fn test_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        fs::write(&empty, "").unwrap();

        assert!(matches!(
            load_certs(&dir.path().join("missing.pem")),
            Err(TlsError::Read { .. })
        ));
        assert!(matches!(load_certs(&empty), Err(TlsError::NoCertificates(_))));
        assert!(matches!(
            load_private_key(&empty),
            Err(TlsError::NoPrivateKey(_))
        ));
    }
}
