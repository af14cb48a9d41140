//! Header-protection mask generation (RFC 9001 §5.4). The mask is derived
//! from a 16-byte sample of the packet's ciphertext and XORed into the
//! first header byte's low bits and the truncated packet-number field.

use aes::cipher::{BlockEncrypt, KeyInit as BlockKeyInit};
use chacha20::cipher::{KeyIvInit, StreamCipher};

use crate::crypto::suite::{CipherSuite, HpCipher};
use crate::error::{QuicError, Result};

pub const SAMPLE_LEN: usize = 16;
pub const MASK_LEN: usize = 5;

/// Offset of the sample within the packet, given the offset of the
/// (always-4-byte-placeholder) packet-number field: spec §4.2.
pub fn sample_offset(pn_offset: usize) -> usize {
    pn_offset + 4
}

/// Compute the 5-byte header-protection mask for `suite` from a 16-byte
/// `sample` taken at `sample_offset(pn_offset)`.
pub fn compute_mask(suite: CipherSuite, hp_key: &[u8], sample: &[u8]) -> Result<[u8; MASK_LEN]> {
    if sample.len() != SAMPLE_LEN {
        return Err(QuicError::ShortBuffer);
    }
    let block = match suite.hp_cipher() {
        HpCipher::Aes128Ctr => aes_ecb_block::<aes::Aes128>(hp_key, sample)?,
        HpCipher::Aes256Ctr => aes_ecb_block::<aes::Aes256>(hp_key, sample)?,
        HpCipher::ChaCha20 => chacha20_block(hp_key, sample)?,
    };
    let mut mask = [0u8; MASK_LEN];
    mask.copy_from_slice(&block[..MASK_LEN]);
    Ok(mask)
}

/// AES header protection is a single AES-ECB block encryption of the
/// sample using the header-protection key (RFC 9001 §5.4.3).
fn aes_ecb_block<C>(key: &[u8], sample: &[u8]) -> Result<[u8; 16]>
where
    C: BlockKeyInit + BlockEncrypt,
{
    let cipher = C::new_from_slice(key).map_err(|_| QuicError::ProtocolViolation("bad HP key length".into()))?;
    let mut block = aes::cipher::generic_array::GenericArray::clone_from_slice(sample);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; 16];
    out.copy_from_slice(&block);
    Ok(out)
}

/// ChaCha20 header protection: the sample's first 4 bytes (little-endian)
/// are the block counter, the remaining 12 bytes are the nonce; the mask
/// is the first keystream block XORed with zero (RFC 9001 §5.4.4).
fn chacha20_block(key: &[u8], sample: &[u8]) -> Result<[u8; 16]> {
    if key.len() != 32 {
        return Err(QuicError::ProtocolViolation("bad HP key length".into()));
    }
    let counter = u32::from_le_bytes(sample[0..4].try_into().unwrap());
    let nonce = &sample[4..16];
    let mut cipher = chacha20::ChaCha20::new(key.into(), nonce.into());
    cipher.seek(u64::from(counter) * 64);
    let mut block = [0u8; 16];
    cipher.apply_keystream(&mut block);
    Ok(block)
}

/// Apply (or remove — XOR is its own inverse) header protection to the
/// first byte and the packet-number field.
///
/// `first_byte_mask` is `0x0f` for long headers, `0x1f` for short headers
/// (spec §4.2/§4.8: "low 4 bits for long headers, low 5 bits for short
/// headers").
pub fn apply(packet: &mut [u8], pn_offset: usize, pn_len: usize, mask: &[u8; MASK_LEN], first_byte_mask: u8) {
    packet[0] ^= mask[0] & first_byte_mask;
    for i in 0..pn_len {
        packet[pn_offset + i] ^= mask[1 + i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_sample() {
        let err = compute_mask(CipherSuite::Aes128Gcm, &[0u8; 16], &[0u8; 8]);
        assert!(matches!(err, Err(QuicError::ShortBuffer)));
    }

    #[test]
    fn mask_application_is_its_own_inverse() {
        let mut packet = vec![0xc3u8, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let original = packet.clone();
        let mask = [0xaa, 0xbb, 0xcc, 0xdd, 0xee];
        apply(&mut packet, 1, 4, &mask, 0x0f);
        assert_ne!(packet, original);
        apply(&mut packet, 1, 4, &mask, 0x0f);
        assert_eq!(packet, original);
    }

    #[test]
    fn aes_and_chacha_masks_differ_for_same_sample() {
        let sample = [7u8; 16];
        let aes_mask = compute_mask(CipherSuite::Aes128Gcm, &[1u8; 16], &sample).unwrap();
        let chacha_mask = compute_mask(CipherSuite::Chacha20Poly1305, &[1u8; 32], &sample).unwrap();
        assert_ne!(aes_mask, chacha_mask);
    }
}
