//! # TLS Termination
//!
//! Server-side TLS for the WebSocket transport. Certificates and keys are
//! loaded from PEM files once, when the server starts.
//!
//! ## Accepted key formats
//! PKCS#8, PKCS#1 (RSA) and SEC1 (EC) private keys; the first key found wins.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::Item;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// TLS server configuration
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: String,
    key_path: String,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_string_lossy().to_string(),
            key_path: key_path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Both paths set, or neither. Anything else is a configuration error.
    pub fn from_paths(cert_file: &str, key_file: &str) -> Result<Option<Self>> {
        match (cert_file.is_empty(), key_file.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some(Self::new(cert_file, key_file))),
            _ => Err(ProtocolError::ConfigError(
                "cert_file and key_file must be set together".into(),
            )),
        }
    }

    /// Load the TLS configuration from files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let cert_file = File::open(&self.cert_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open cert file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);
        let cert_chain: Vec<Certificate> = rustls_pemfile::certs(&mut cert_reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse certificate".into()))?
            .into_iter()
            .map(Certificate)
            .collect();
        if cert_chain.is_empty() {
            return Err(ProtocolError::TlsError("No certificates found".into()));
        }

        let key_file = File::open(&self.key_path)
            .map_err(|e| ProtocolError::TlsError(format!("Failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);
        let private_key = rustls_pemfile::read_all(&mut key_reader)
            .map_err(|_| ProtocolError::TlsError("Failed to parse private key".into()))?
            .into_iter()
            .find_map(|item| match item {
                Item::PKCS8Key(key) | Item::RSAKey(key) | Item::ECKey(key) => Some(PrivateKey(key)),
                _ => None,
            })
            .ok_or_else(|| ProtocolError::TlsError("No private keys found".into()))?;

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ProtocolError::TlsError(format!("TLS error: {e}")))?;

        debug!(cert = %self.cert_path, "TLS server config loaded");
        Ok(config)
    }

    /// Build an acceptor for incoming streams.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}
