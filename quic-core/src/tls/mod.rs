//! The QUIC↔TLS boundary (spec §4.10/§6): this core treats the TLS 1.3
//! engine as an external black box reached only through the two trait
//! interfaces below, mirroring the `SSL_QUIC_METHOD` callback shape TLS
//! libraries expose for QUIC integration. A concrete engine (backed by
//! whatever TLS library) lives outside this crate and implements
//! [`QuicTlsEngine`]; this crate drives it and implements [`QuicMethodSink`]
//! on the connection object to receive its callbacks.

use crate::crypto::suite::CipherSuite;
use crate::error::Result;
use crate::level::EncryptionLevel;

/// Outcome of one `do_handshake` step (spec §6: "ok|want_read|want_write|error").
/// `error` is represented by the `Result::Err` path instead of a variant here.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandshakeStatus {
    /// The handshake needs more CRYPTO data from the peer before it can
    /// make further progress; nothing else to do this iteration.
    WantRead,
    /// The TLS engine produced handshake bytes or wants a flight flushed.
    WantWrite,
    /// The handshake has reached completion (spec §4.12).
    Complete,
}

/// Callbacks the TLS engine invokes on the connection while driving the
/// handshake forward (spec §4.10, first half).
pub trait QuicMethodSink {
    /// Install the RX key material for `level`, derived by this core's
    /// own key schedule from the raw `secret` the TLS engine computed.
    fn install_read_secret(&mut self, level: EncryptionLevel, suite: CipherSuite, secret: &[u8]) -> Result<()>;

    /// Symmetric for TX.
    fn install_write_secret(&mut self, level: EncryptionLevel, suite: CipherSuite, secret: &[u8]) -> Result<()>;

    /// Append `bytes` to the TX CRYPTO stream at `level`. Must never be
    /// called for 0-RTT; this core rejects that with a connection-fatal
    /// error rather than panicking, since the call originates outside
    /// this crate (spec §4.10).
    fn add_handshake_data(&mut self, level: EncryptionLevel, bytes: &[u8]) -> Result<()>;

    /// Best-effort signal that the send pipeline should run.
    fn flush_flight(&mut self);

    /// Record a fatal TLS alert; the driver turns this into a
    /// CONNECTION_CLOSE with code `0x100 + alert` (spec §4.10/§7).
    fn send_alert(&mut self, level: EncryptionLevel, alert: u8);
}

/// The operations the connection calls into the TLS engine with
/// (spec §4.10, second half / §6).
pub trait QuicTlsEngine {
    /// Deliver in-order CRYPTO payload at `level`. Called only when
    /// `offset == level.rx.crypto.offset` (spec §4.10).
    fn provide_quic_data(&mut self, level: EncryptionLevel, bytes: &[u8]) -> Result<()>;

    /// Drive the handshake state machine forward, invoking `sink`'s
    /// callbacks synchronously as key material and handshake bytes
    /// become available.
    fn do_handshake(&mut self, sink: &mut dyn QuicMethodSink) -> Result<HandshakeStatus>;

    /// Process any post-handshake TLS messages (session tickets, etc.)
    /// that arrive after completion. A no-op for engines that don't
    /// emit any, but always called once per driver iteration
    /// (spec §4.12 step 2).
    fn process_post_handshake(&mut self, sink: &mut dyn QuicMethodSink) -> Result<()>;

    /// Hand the locally-selected transport parameters blob to the TLS
    /// engine for inclusion in its extension (spec §6 `set_transport_params`).
    fn set_transport_parameters(&mut self, blob: &[u8]) -> Result<()>;

    /// The peer's transport-parameters blob, available only once it has
    /// arrived inside the handshake (spec §6 `get_peer_transport_params`).
    fn peer_transport_parameters(&self) -> Option<&[u8]>;

    fn is_handshake_complete(&self) -> bool;
}
