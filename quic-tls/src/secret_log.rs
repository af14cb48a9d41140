//! Bridges rustls's internal key schedule to raw per-label traffic
//! secrets via the stable `KeyLog` trait (normally used for
//! `SSLKEYLOGFILE` debug dumps). rustls calls `log()` synchronously as
//! each secret is derived, strictly before the corresponding
//! `write_hs`/`read_hs` call that depends on it returns, so a lookup
//! right after observing a `KeyChange` always finds the secret already
//! recorded.

use std::collections::HashMap;
use std::sync::Mutex;

use rustls::KeyLog;

#[derive(Default)]
pub struct SecretLog {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl SecretLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self, label: &str) -> Option<Vec<u8>> {
        self.secrets.lock().expect("secret log mutex poisoned").remove(label)
    }
}

impl KeyLog for SecretLog {
    fn log(&self, label: &str, _client_random: &[u8], secret: &[u8]) {
        self.secrets.lock().expect("secret log mutex poisoned").insert(label.to_string(), secret.to_vec());
    }
}

pub const CLIENT_HANDSHAKE_TRAFFIC_SECRET: &str = "CLIENT_HANDSHAKE_TRAFFIC_SECRET";
pub const SERVER_HANDSHAKE_TRAFFIC_SECRET: &str = "SERVER_HANDSHAKE_TRAFFIC_SECRET";
pub const CLIENT_TRAFFIC_SECRET_0: &str = "CLIENT_TRAFFIC_SECRET_0";
pub const SERVER_TRAFFIC_SECRET_0: &str = "SERVER_TRAFFIC_SECRET_0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_a_secret_logged_under_that_label() {
        let log = SecretLog::new();
        log.log(SERVER_HANDSHAKE_TRAFFIC_SECRET, &[], &[0xaa; 32]);
        assert_eq!(log.take(SERVER_HANDSHAKE_TRAFFIC_SECRET), Some(vec![0xaa; 32]));
    }

    #[test]
    fn take_is_consuming_and_unlogged_labels_are_none() {
        let log = SecretLog::new();
        log.log(CLIENT_TRAFFIC_SECRET_0, &[], &[0x11; 32]);
        assert!(log.take(CLIENT_TRAFFIC_SECRET_0).is_some());
        assert_eq!(log.take(CLIENT_TRAFFIC_SECRET_0), None);
        assert_eq!(log.take(SERVER_TRAFFIC_SECRET_0), None);
    }

    #[test]
    fn logging_the_same_label_twice_keeps_the_latest_secret() {
        let log = SecretLog::new();
        log.log(CLIENT_HANDSHAKE_TRAFFIC_SECRET, &[], &[0x01; 32]);
        log.log(CLIENT_HANDSHAKE_TRAFFIC_SECRET, &[], &[0x02; 32]);
        assert_eq!(log.take(CLIENT_HANDSHAKE_TRAFFIC_SECRET), Some(vec![0x02; 32]));
    }
}
