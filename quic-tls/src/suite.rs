//! Maps rustls's negotiated cipher suite onto `quic_core`'s own
//! `CipherSuite` enum (spec §4.3: "later levels inherit the TLS-selected
//! suite").

use quic_core::crypto::suite::CipherSuite;
use quic_core::error::{QuicError, Result};

pub fn from_rustls(suite: rustls::SupportedCipherSuite) -> Result<CipherSuite> {
    match suite.suite() {
        rustls::CipherSuite::TLS13_AES_128_GCM_SHA256 => Ok(CipherSuite::Aes128Gcm),
        rustls::CipherSuite::TLS13_AES_256_GCM_SHA384 => Ok(CipherSuite::Aes256Gcm),
        rustls::CipherSuite::TLS13_CHACHA20_POLY1305_SHA256 => Ok(CipherSuite::Chacha20Poly1305),
        other => Err(QuicError::ProtocolViolation(format!("unsupported QUIC cipher suite {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::crypto::ring::cipher_suite;

    #[test]
    fn maps_every_tls13_suite_rustls_can_negotiate() {
        assert_eq!(from_rustls(cipher_suite::TLS13_AES_128_GCM_SHA256).unwrap(), CipherSuite::Aes128Gcm);
        assert_eq!(from_rustls(cipher_suite::TLS13_AES_256_GCM_SHA384).unwrap(), CipherSuite::Aes256Gcm);
        assert_eq!(from_rustls(cipher_suite::TLS13_CHACHA20_POLY1305_SHA256).unwrap(), CipherSuite::Chacha20Poly1305);
    }
}
