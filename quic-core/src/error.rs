use thiserror::Error;

/// Errors produced while driving a QUIC connection or the listener demux.
#[derive(Error, Debug)]
pub enum QuicError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer too short to decode a well-formed value")]
    ShortBuffer,

    #[error("AEAD authentication failed")]
    AeadAuthFailed,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("frame encoding error: {0}")]
    FrameEncodingError(String),

    #[error("CRYPTO stream buffer exhausted")]
    CryptoBufferExhausted,

    #[error("CRYPTO in-flight cap exceeded, send stalled")]
    InFlightCap,

    #[error("TX datagram ring full, send stalled until UDP-write-ready")]
    TxRingFull,

    #[error("TLS alert {alert} at level {level:?}")]
    TlsAlert { level: crate::level::EncryptionLevel, alert: u8 },

    #[error("idle timeout")]
    IdleTimeout,

    #[error("unknown connection ID")]
    UnknownConnectionId,

    #[error("configuration error: {0}")]
    Config(String),
}

impl QuicError {
    /// Map this error onto the QUIC transport error-code space (RFC 9000 §20.1),
    /// for connections that must be closed with CONNECTION_CLOSE.
    pub fn transport_code(&self) -> Option<u64> {
        match self {
            QuicError::ProtocolViolation(_) => Some(0x0a),
            QuicError::FrameEncodingError(_) => Some(0x07),
            QuicError::TlsAlert { alert, .. } => Some(0x100 + *alert as u64),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QuicError>;
