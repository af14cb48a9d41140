//! HKDF-Extract and the TLS 1.3 / QUIC `HKDF-Expand-Label` construction
//! (RFC 8446 §7.1, reused verbatim by RFC 9001 §5.1 with the labels
//! `"client in"`, `"server in"`, `"quic key"`, `"quic iv"`, `"quic hp"`).

use hkdf::Hkdf;
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use crate::crypto::suite::Md;
use crate::error::{QuicError, Result};

const LABEL_PREFIX: &[u8] = b"tls13 ";

/// A pseudo-random key produced by `HKDF-Extract`, tagged with the hash
/// that produced it so later `expand_label` calls pick the right digest.
pub struct Prk {
    md: Md,
    bytes: Zeroizing<Vec<u8>>,
}

impl Prk {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn md(&self) -> Md {
        self.md
    }

    /// `HKDF-Extract(salt, ikm)`, hash selected by `md`.
    pub fn extract(md: Md, salt: &[u8], ikm: &[u8]) -> Self {
        let bytes = match md {
            Md::Sha256 => {
                let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
                prk.to_vec()
            }
            Md::Sha384 => {
                let (prk, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
                prk.to_vec()
            }
        };
        Self { md, bytes: Zeroizing::new(bytes) }
    }

    /// Wrap raw secret bytes handed to us by the TLS engine (a traffic
    /// secret at Handshake/Application level) as a `Prk` for further
    /// `expand_label` calls, without going through `HKDF-Extract` again —
    /// those secrets are already the output of the TLS key schedule.
    pub fn from_secret(md: Md, secret: &[u8]) -> Self {
        Self { md, bytes: Zeroizing::new(secret.to_vec()) }
    }

    /// `HKDF-Expand-Label(self, label, "", length)`.
    pub fn expand_label(&self, label: &[u8], length: usize) -> Result<Zeroizing<Vec<u8>>> {
        let info = build_hkdf_label(label, length)?;
        let mut out = Zeroizing::new(vec![0u8; length]);
        match self.md {
            Md::Sha256 => {
                let hk = Hkdf::<Sha256>::from_prk(&self.bytes)
                    .map_err(|_| QuicError::ProtocolViolation("invalid PRK length".into()))?;
                hk.expand(&info, &mut out)
                    .map_err(|_| QuicError::ProtocolViolation("HKDF-Expand output too long".into()))?;
            }
            Md::Sha384 => {
                let hk = Hkdf::<Sha384>::from_prk(&self.bytes)
                    .map_err(|_| QuicError::ProtocolViolation("invalid PRK length".into()))?;
                hk.expand(&info, &mut out)
                    .map_err(|_| QuicError::ProtocolViolation("HKDF-Expand output too long".into()))?;
            }
        }
        Ok(out)
    }
}

/// Build the `HkdfLabel` structure TLS 1.3 HKDF-Expand-Label feeds as the
/// `info` parameter to plain HKDF-Expand: a 2-byte length, a
/// length-prefixed `"tls13 " + label`, and an (always empty, for our
/// callers) length-prefixed context.
fn build_hkdf_label(label: &[u8], length: usize) -> Result<Vec<u8>> {
    let full_label_len = LABEL_PREFIX.len() + label.len();
    if full_label_len > 255 || length > u16::MAX as usize {
        return Err(QuicError::ProtocolViolation("HKDF label too long".into()));
    }
    let mut out = Vec::with_capacity(2 + 1 + full_label_len + 1);
    out.extend_from_slice(&(length as u16).to_be_bytes());
    out.push(full_label_len as u8);
    out.extend_from_slice(LABEL_PREFIX);
    out.extend_from_slice(label);
    out.push(0); // empty context
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc9001_appendix_a1_initial_secrets() {
        // RFC 9001 Appendix A.1, server side.
        let dcid = hex::decode("8394c8f03e515708").unwrap();
        let salt = crate::crypto::initial::QUIC_V1_INITIAL_SALT;
        let initial = Prk::extract(Md::Sha256, salt, &dcid);

        let server_initial = initial.expand_label(b"server in", 32).unwrap();
        assert_eq!(
            hex::encode(&*server_initial),
            "3c199828fd139efd216c155ad844cc81fb82fa8d7446fa7d78be803acdda951"
        );

        let server_prk = Prk::from_secret(Md::Sha256, &server_initial);
        let key = server_prk.expand_label(b"quic key", 16).unwrap();
        assert_eq!(hex::encode(&*key), "cf3a5331653c364c88f0f379b6067e37");

        let iv = server_prk.expand_label(b"quic iv", 12).unwrap();
        assert_eq!(hex::encode(&*iv), "0ac1493ca1905853b0bba03e");

        let hp = server_prk.expand_label(b"quic hp", 16).unwrap();
        assert_eq!(hex::encode(&*hp), "c206b8d9b9f0f37644430b490eeaa314");
    }
}
