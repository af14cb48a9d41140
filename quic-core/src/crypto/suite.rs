use std::fmt;

/// AEAD/HP suites this core understands (RFC 9001 §5.3 table).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CipherSuite {
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
    Aes128Ccm,
}

/// Hash function backing the key schedule for a suite.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Md {
    Sha256,
    Sha384,
}

/// Header-protection cipher a suite uses (RFC 9001 §5.4.3/§5.4.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HpCipher {
    Aes128Ctr,
    Aes256Ctr,
    ChaCha20,
}

impl CipherSuite {
    /// AEAD key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            CipherSuite::Aes128Gcm | CipherSuite::Aes128Ccm => 16,
            CipherSuite::Aes256Gcm => 32,
            CipherSuite::Chacha20Poly1305 => 32,
        }
    }

    /// IV length in bytes; fixed at 12 for every suite in this core.
    pub fn iv_len(self) -> usize {
        12
    }

    /// AEAD authentication tag length; fixed at 16 for every suite here.
    pub fn tag_len(self) -> usize {
        16
    }

    pub fn md(self) -> Md {
        match self {
            CipherSuite::Aes256Gcm => Md::Sha384,
            _ => Md::Sha256,
        }
    }

    pub fn hp_cipher(self) -> HpCipher {
        match self {
            CipherSuite::Aes128Gcm | CipherSuite::Aes128Ccm => HpCipher::Aes128Ctr,
            CipherSuite::Aes256Gcm => HpCipher::Aes256Ctr,
            CipherSuite::Chacha20Poly1305 => HpCipher::ChaCha20,
        }
    }
}

impl Md {
    pub fn len(self) -> usize {
        match self {
            Md::Sha256 => 32,
            Md::Sha384 => 48,
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CipherSuite::Aes128Gcm => "TLS_AES_128_GCM_SHA256",
            CipherSuite::Aes256Gcm => "TLS_AES_256_GCM_SHA384",
            CipherSuite::Chacha20Poly1305 => "TLS_CHACHA20_POLY1305_SHA256",
            CipherSuite::Aes128Ccm => "TLS_AES_128_CCM_SHA256",
        };
        f.write_str(s)
    }
}
