//! Certificate/key loading and `rustls::ServerConfig` construction
//! (`rustls_pki_types::pem::PemObject` readers, `with_single_cert`),
//! restricted to TLS 1.3 only, since QUIC v1 has no TLS 1.2 mode.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use quic_core::error::{QuicError, Result};

use crate::secret_log::SecretLog;

/// Build the `rustls::ServerConfig` template this engine drives the QUIC
/// handshake with. `alpn` is the application protocol list advertised in
/// the TLS ALPN extension (spec §1: application-layer mux is out of
/// scope for this core, but ALPN negotiation still happens inside the
/// handshake it drives).
///
/// This does not set `key_log` — it's a shared template cloned per
/// connection by [`for_connection`], each clone getting its own
/// [`SecretLog`] instance. A single shared `key_log` would mix different
/// connections' secrets together under the same NSS label strings.
pub fn build_server_config(cert_path: &Path, key_path: &Path, alpn: &[String]) -> Result<Arc<ServerConfig>> {
    let cert_bytes =
        std::fs::read(cert_path).map_err(|e| QuicError::Config(format!("failed to read certificate: {e}")))?;
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&cert_bytes)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| QuicError::Config(format!("failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(QuicError::Config("no certificates found".into()));
    }

    let key_bytes = std::fs::read(key_path).map_err(|e| QuicError::Config(format!("failed to read key: {e}")))?;
    let mut keys: Vec<PrivateKeyDer<'static>> = PrivateKeyDer::pem_slice_iter(&key_bytes)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| QuicError::Config(format!("failed to parse private key: {e}")))?;
    let key = keys.pop().ok_or_else(|| QuicError::Config("no private key found in key file".into()))?;

    let mut server = ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| QuicError::Config(format!("failed to build TLS config: {e}")))?;

    server.alpn_protocols = alpn.iter().map(|s| s.as_bytes().to_vec()).collect();
    // 0-RTT is out of scope for this core (spec §1 Non-goals); make sure
    // rustls never offers early-data keys to derive.
    server.max_early_data_size = 0;

    Ok(Arc::new(server))
}

/// Clone `base` with a fresh per-connection [`SecretLog`] installed as
/// its key log, so secrets from distinct connections never land in the
/// same label-keyed map.
pub fn for_connection(base: &ServerConfig, secret_log: Arc<SecretLog>) -> Arc<ServerConfig> {
    let mut cfg = base.clone();
    cfg.key_log = secret_log;
    Arc::new(cfg)
}
