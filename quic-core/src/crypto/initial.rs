//! Initial-secret derivation (RFC 9001 §5.2): the one place traffic
//! secrets are derived from public data (the client's chosen DCID) rather
//! than handed down by the TLS engine.

use crate::codec::ConnectionId;
use crate::crypto::hkdf::Prk;
use crate::crypto::schedule::LevelSecrets;
use crate::crypto::suite::{CipherSuite, Md};

/// The fixed QUIC v1 initial salt (RFC 9001 §5.2).
pub const QUIC_V1_INITIAL_SALT: &[u8] = &[
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c, 0xad,
    0xcc, 0xbb, 0x7f, 0x0a,
];

/// The fixed suite used for Initial packets regardless of what the
/// handshake eventually negotiates (spec §4.3).
pub const INITIAL_SUITE: CipherSuite = CipherSuite::Aes128Gcm;

/// `derive_initial_secrets` (spec §4.3): from the DCID the client chose
/// for its first Initial packet, derive the client/server Initial
/// traffic secrets and, from each, the full `{key, iv, hp_key}` triple.
pub fn derive_initial_secrets(server: bool, dcid: &ConnectionId) -> (LevelSecrets, LevelSecrets) {
    let initial = Prk::extract(Md::Sha256, QUIC_V1_INITIAL_SALT, dcid.as_slice());
    let client_initial = initial.expand_label(b"client in", 32).expect("fixed length fits");
    let server_initial = initial.expand_label(b"server in", 32).expect("fixed length fits");

    let client_prk = Prk::from_secret(Md::Sha256, &client_initial);
    let server_prk = Prk::from_secret(Md::Sha256, &server_initial);

    let client = LevelSecrets::derive(INITIAL_SUITE, &client_prk);
    let server = LevelSecrets::derive(INITIAL_SUITE, &server_prk);

    if server {
        (client, server) // (rx, tx)
    } else {
        (server, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc9001_appendix_a_client_and_server_keys() {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let (rx, tx) = derive_initial_secrets(true, &dcid);

        // Server is RX on the client's secret, TX on its own.
        assert_eq!(hex::encode(rx.key.as_slice()), "1f369613dd76d5467730efcbe3b1a22d");
        assert_eq!(hex::encode(rx.iv.as_slice()), "fa044b2f42a3fd3b46fb255c");
        assert_eq!(hex::encode(rx.hp_key.as_slice()), "9f50449e04a0e810283a1e9933adedd2");

        assert_eq!(hex::encode(tx.key.as_slice()), "cf3a5331653c364c88f0f379b6067e37");
        assert_eq!(hex::encode(tx.iv.as_slice()), "0ac1493ca1905853b0bba03e");
        assert_eq!(hex::encode(tx.hp_key.as_slice()), "c206b8d9b9f0f37644430b490eeaa314");
    }

    #[test]
    fn client_and_server_secrets_swap_by_role() {
        let dcid = ConnectionId::from_slice(&hex::decode("8394c8f03e515708").unwrap()).unwrap();
        let (server_rx, server_tx) = derive_initial_secrets(true, &dcid);
        let (client_rx, client_tx) = derive_initial_secrets(false, &dcid);
        assert_eq!(server_rx.key.as_slice(), client_tx.key.as_slice());
        assert_eq!(server_tx.key.as_slice(), client_rx.key.as_slice());
    }
}
