//! Per-level key derivation: from a traffic secret (either our own Initial
//! secret or one handed down by the TLS engine) to the `{key, iv, hp_key}`
//! triple packet protection actually uses (spec §4.3, last paragraph).

use zeroize::Zeroizing;

use crate::crypto::hkdf::Prk;
use crate::crypto::suite::CipherSuite;

/// The derived key material for one direction (RX or TX) at one
/// encryption level.
pub struct LevelSecrets {
    pub suite: CipherSuite,
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
    pub hp_key: Zeroizing<Vec<u8>>,
}

impl LevelSecrets {
    /// `key <- Expand-Label(secret, "quic key", K)`,
    /// `iv  <- Expand-Label(secret, "quic iv", 12)`,
    /// `hp_key <- Expand-Label(secret, "quic hp", K)`, with `K` the
    /// suite's AEAD key length.
    pub fn derive(suite: CipherSuite, secret: &Prk) -> Self {
        let key = secret.expand_label(b"quic key", suite.key_len()).expect("fixed length fits");
        let iv = secret.expand_label(b"quic iv", suite.iv_len()).expect("fixed length fits");
        let hp_key = secret.expand_label(b"quic hp", suite.key_len()).expect("fixed length fits");
        Self { suite, key, iv, hp_key }
    }
}
