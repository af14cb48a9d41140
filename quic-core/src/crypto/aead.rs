//! AEAD seal/open over the four QUIC v1 packet-protection suites
//! (RFC 9001 §5.3). All four use a 96-bit nonce built by XORing the
//! packet number (left-zero-padded) into the derived IV, and a 16-byte
//! authentication tag.

use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ccm::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;

use crate::crypto::suite::CipherSuite;
use crate::error::{QuicError, Result};

type Aes128Ccm = ccm::Ccm<aes::Aes128, ccm::consts::U16, ccm::consts::U12>;

/// Build the per-packet nonce: `iv XOR left_zero_pad(pn, len(iv))`.
pub fn packet_nonce(iv: &[u8], pn: u64) -> [u8; 12] {
    debug_assert_eq!(iv.len(), 12);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(iv);
    let pn_bytes = pn.to_be_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= pn_bytes[i];
    }
    nonce
}

/// AEAD-seal `plaintext` under `(suite, key, nonce-from(iv, pn), aad)`,
/// returning `ciphertext || 16-byte tag`.
pub fn seal(suite: CipherSuite, key: &[u8], iv: &[u8], pn: u64, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = packet_nonce(iv, pn);
    let payload = Payload { msg: plaintext, aad };
    let fail = || QuicError::ProtocolViolation("AEAD seal failed".into());
    match suite {
        CipherSuite::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| fail())?;
            cipher.encrypt((&nonce).into(), payload).map_err(|_| fail())
        }
        CipherSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| fail())?;
            cipher.encrypt((&nonce).into(), payload).map_err(|_| fail())
        }
        CipherSuite::Chacha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| fail())?;
            cipher.encrypt((&nonce).into(), payload).map_err(|_| fail())
        }
        CipherSuite::Aes128Ccm => {
            let cipher = Aes128Ccm::new_from_slice(key).map_err(|_| fail())?;
            cipher.encrypt((&nonce).into(), payload).map_err(|_| fail())
        }
    }
}

/// AEAD-open `ciphertext_and_tag`. Returns `QuicError::AeadAuthFailed` on
/// any authentication failure (wrong key, corrupted bytes, wrong AAD, or
/// a packet number reconstructed incorrectly) — this core never
/// distinguishes the cause, per spec §4.2/§7.
pub fn open(
    suite: CipherSuite,
    key: &[u8],
    iv: &[u8],
    pn: u64,
    aad: &[u8],
    ciphertext_and_tag: &[u8],
) -> Result<Vec<u8>> {
    let nonce = packet_nonce(iv, pn);
    let payload = Payload { msg: ciphertext_and_tag, aad };
    let result = match suite {
        CipherSuite::Aes128Gcm => {
            let cipher = Aes128Gcm::new_from_slice(key).map_err(|_| QuicError::AeadAuthFailed)?;
            cipher.decrypt((&nonce).into(), payload)
        }
        CipherSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| QuicError::AeadAuthFailed)?;
            cipher.decrypt((&nonce).into(), payload)
        }
        CipherSuite::Chacha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| QuicError::AeadAuthFailed)?;
            cipher.decrypt((&nonce).into(), payload)
        }
        CipherSuite::Aes128Ccm => {
            let cipher = Aes128Ccm::new_from_slice(key).map_err(|_| QuicError::AeadAuthFailed)?;
            cipher.decrypt((&nonce).into(), payload)
        }
    };
    result.map_err(|_| QuicError::AeadAuthFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_roundtrips() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 12];
        let aad = b"header bytes";
        let plaintext = b"crypto frame payload";

        let sealed = seal(CipherSuite::Aes128Gcm, &key, &iv, 7, aad, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + 16);

        let opened = open(CipherSuite::Aes128Gcm, &key, &iv, 7, aad, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_packet_number_fails_auth() {
        let key = [0x33u8; 32];
        let iv = [0x44u8; 12];
        let sealed = seal(CipherSuite::Chacha20Poly1305, &key, &iv, 1, b"aad", b"hello").unwrap();
        assert!(matches!(
            open(CipherSuite::Chacha20Poly1305, &key, &iv, 2, b"aad", &sealed),
            Err(QuicError::AeadAuthFailed)
        ));
    }

    #[test]
    fn tampered_aad_fails_auth() {
        let key = [0x55u8; 16];
        let iv = [0x66u8; 12];
        let sealed = seal(CipherSuite::Aes128Ccm, &key, &iv, 3, b"aad-a", b"payload").unwrap();
        assert!(matches!(
            open(CipherSuite::Aes128Ccm, &key, &iv, 3, b"aad-b", &sealed),
            Err(QuicError::AeadAuthFailed)
        ));
    }
}
