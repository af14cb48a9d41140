//! TOML configuration loading (SPEC_FULL §3.3), mirroring the teacher's
//! `config::loader::load_from_path`: read the file, parse, then run a
//! structural validation pass before handing back a [`Config`].

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use quic_core::error::{QuicError, Result};
use serde::Deserialize;

fn default_local_cid_len() -> usize {
    quic_core::conn::DEFAULT_LOCAL_CID_LEN
}

fn default_max_idle_timeout_ms() -> u64 {
    30_000
}

fn default_active_connection_id_limit() -> u64 {
    2
}

fn default_initial_max_data() -> u64 {
    1 << 20
}

fn default_stream_data_limit() -> u64 {
    1 << 16
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen: SocketAddr,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,

    #[serde(default = "default_local_cid_len")]
    pub local_cid_len: usize,
    #[serde(default = "default_max_idle_timeout_ms")]
    pub max_idle_timeout_ms: u64,
    #[serde(default = "default_active_connection_id_limit")]
    pub active_connection_id_limit: u64,
    #[serde(default = "default_initial_max_data")]
    pub initial_max_data: u64,
    #[serde(default = "default_stream_data_limit")]
    pub initial_max_stream_data_bidi_local: u64,
    #[serde(default = "default_stream_data_limit")]
    pub initial_max_stream_data_bidi_remote: u64,
    #[serde(default = "default_stream_data_limit")]
    pub initial_max_stream_data_uni: u64,
    #[serde(default)]
    pub alpn: Vec<String>,
}

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p).map_err(|e| QuicError::Config(format!("failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt).map_err(|e| QuicError::Config(format!("failed to parse config: {e}")))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<()> {
    if !cfg.cert_path.exists() {
        return Err(QuicError::Config(format!("certificate file not found: {}", cfg.cert_path.display())));
    }
    if !cfg.key_path.exists() {
        return Err(QuicError::Config(format!("key file not found: {}", cfg.key_path.display())));
    }
    if cfg.local_cid_len == 0 || cfg.local_cid_len > 20 {
        return Err(QuicError::Config("local_cid_len must be between 1 and 20".into()));
    }
    if cfg.active_connection_id_limit < 2 {
        return Err(QuicError::Config("active_connection_id_limit must be at least 2".into()));
    }
    Ok(())
}

impl Config {
    pub fn local_transport_params(&self) -> quic_core::transport_params::TransportParameters {
        quic_core::transport_params::TransportParameters {
            max_idle_timeout: self.max_idle_timeout_ms,
            active_connection_id_limit: self.active_connection_id_limit,
            initial_max_data: self.initial_max_data,
            initial_max_stream_data_bidi_local: self.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: self.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: self.initial_max_stream_data_uni,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, extra: &str) -> PathBuf {
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        fs::write(&cert, "dummy").unwrap();
        fs::write(&key, "dummy").unwrap();

        let toml = format!(
            "listen = \"127.0.0.1:4433\"\ncert_path = \"{}\"\nkey_path = \"{}\"\n{extra}",
            cert.display(),
            key.display()
        );
        let path = dir.path().join("cfg.toml");
        fs::write(&path, toml).unwrap();
        path
    }

    #[test]
    fn missing_cert_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let toml = format!(
            "listen = \"127.0.0.1:4433\"\ncert_path = \"{}\"\nkey_path = \"{}\"\n",
            dir.path().join("missing-cert.pem").display(),
            dir.path().join("missing-key.pem").display(),
        );
        let path = dir.path().join("cfg.toml");
        fs::write(&path, toml).unwrap();
        assert!(load_from_path(&path).is_err());
    }

    #[test]
    fn defaults_are_applied_when_fields_are_omitted() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "");
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.local_cid_len, 8);
        assert_eq!(cfg.max_idle_timeout_ms, 30_000);
        assert_eq!(cfg.active_connection_id_limit, 2);
    }

    #[test]
    fn active_connection_id_limit_below_two_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "active_connection_id_limit = 1\n");
        assert!(load_from_path(&path).is_err());
    }
}
