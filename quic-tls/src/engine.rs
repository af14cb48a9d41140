//! The `QuicTlsEngine` implementation: a thin adapter around
//! `rustls::quic::ServerConnection` (spec §4.10/§6, "assumed to be a
//! black-box primitive offering the callbacks below").

use std::sync::Arc;

use rustls::quic::{Connection, KeyChange, ServerConnection, Version as QuicVersion};
use rustls::ServerConfig;
use tracing::{debug, trace};

use quic_core::error::{QuicError, Result};
use quic_core::level::EncryptionLevel;
use quic_core::tls::{HandshakeStatus, QuicMethodSink, QuicTlsEngine};

use crate::secret_log::{self, SecretLog};
use crate::suite;

/// One per connection. `conn` drives the TLS 1.3 state machine over raw
/// handshake-message bytes (no TLS record layer — that's what
/// `rustls::quic` strips away); `secret_log` is how this adapter
/// recovers the raw per-level traffic secrets `quic-core`'s own key
/// schedule needs (see the module doc on `lib.rs`).
pub struct RustlsQuicEngine {
    conn: Connection,
    secret_log: Arc<SecretLog>,
    /// The encryption level the next `write_hs` output belongs to; a
    /// `KeyChange` returned by `write_hs` announces the level for
    /// *subsequent* calls, not the bytes just written (mirrors how
    /// rustls-backed QUIC implementations track the write side).
    write_level: EncryptionLevel,
}

impl RustlsQuicEngine {
    /// `local_transport_params` is the already-encoded blob (spec §6):
    /// rustls's QUIC constructors take it up front as part of the
    /// ClientHello/EncryptedExtensions it builds, so there is no
    /// after-the-fact `set_transport_parameters` call for this engine —
    /// see that trait method's doc comment.
    pub fn new_server(
        config: Arc<ServerConfig>,
        local_transport_params: Vec<u8>,
        secret_log: Arc<SecretLog>,
    ) -> Result<Self> {
        let conn = ServerConnection::new(config, QuicVersion::V1, local_transport_params)
            .map_err(|e| QuicError::ProtocolViolation(format!("failed to start TLS: {e}")))?;
        Ok(Self { conn: Connection::Server(conn), secret_log, write_level: EncryptionLevel::Initial })
    }

    fn install_level_secrets(
        &mut self,
        level: EncryptionLevel,
        read_label: &str,
        write_label: &str,
        sink: &mut dyn QuicMethodSink,
    ) -> Result<()> {
        let negotiated = match &self.conn {
            Connection::Server(c) => c.negotiated_cipher_suite(),
            Connection::Client(c) => c.negotiated_cipher_suite(),
        }
        .ok_or_else(|| QuicError::ProtocolViolation("no cipher suite negotiated yet".into()))?;
        let cipher_suite = suite::from_rustls(negotiated)?;

        if let Some(read_secret) = self.secret_log.take(read_label) {
            sink.install_read_secret(level, cipher_suite, &read_secret)?;
        }
        if let Some(write_secret) = self.secret_log.take(write_label) {
            sink.install_write_secret(level, cipher_suite, &write_secret)?;
        }
        Ok(())
    }
}

impl QuicTlsEngine for RustlsQuicEngine {
    fn provide_quic_data(&mut self, _level: EncryptionLevel, bytes: &[u8]) -> Result<()> {
        // rustls's QUIC record layer tracks the expected handshake-level
        // sequencing itself from the message stream; it doesn't need the
        // caller to tag each chunk (spec §4.10 still only ever calls this
        // with in-order bytes, one level's stream at a time).
        match &mut self.conn {
            Connection::Server(c) => c.read_hs(bytes),
            Connection::Client(c) => c.read_hs(bytes),
        }
        .map_err(|e| QuicError::ProtocolViolation(format!("TLS handshake data rejected: {e}")))
    }

    fn do_handshake(&mut self, sink: &mut dyn QuicMethodSink) -> Result<HandshakeStatus> {
        loop {
            let mut buf = Vec::new();
            let key_change = match &mut self.conn {
                Connection::Server(c) => c.write_hs(&mut buf),
                Connection::Client(c) => c.write_hs(&mut buf),
            };

            if !buf.is_empty() {
                trace!(level = %self.write_level, len = buf.len(), "TLS engine produced handshake bytes");
                sink.add_handshake_data(self.write_level, &buf)?;
            }

            match key_change {
                Some(KeyChange::Handshake { .. }) => {
                    debug!("handshake traffic keys derived");
                    self.install_level_secrets(
                        EncryptionLevel::Handshake,
                        secret_log::CLIENT_HANDSHAKE_TRAFFIC_SECRET,
                        secret_log::SERVER_HANDSHAKE_TRAFFIC_SECRET,
                        sink,
                    )?;
                    self.write_level = EncryptionLevel::Handshake;
                }
                Some(KeyChange::OneRtt { .. }) => {
                    debug!("application traffic keys derived");
                    self.install_level_secrets(
                        EncryptionLevel::Application,
                        secret_log::CLIENT_TRAFFIC_SECRET_0,
                        secret_log::SERVER_TRAFFIC_SECRET_0,
                        sink,
                    )?;
                    self.write_level = EncryptionLevel::Application;
                }
                None => {
                    if buf.is_empty() {
                        break;
                    }
                }
            }
        }

        let alert = match &self.conn {
            Connection::Server(c) => c.alert(),
            Connection::Client(c) => c.alert(),
        };
        if let Some(alert) = alert {
            sink.send_alert(self.write_level, alert_to_wire(alert));
        }

        let is_handshaking = match &self.conn {
            Connection::Server(c) => c.is_handshaking(),
            Connection::Client(c) => c.is_handshaking(),
        };
        Ok(if is_handshaking { HandshakeStatus::WantRead } else { HandshakeStatus::Complete })
    }

    fn process_post_handshake(&mut self, sink: &mut dyn QuicMethodSink) -> Result<()> {
        // Session tickets etc. arrive through the same write_hs channel;
        // draining once more after completion picks them up (spec §4.12
        // step 2 calls this unconditionally every iteration).
        if self.is_handshake_complete() {
            let mut buf = Vec::new();
            let key_change = match &mut self.conn {
                Connection::Server(c) => c.write_hs(&mut buf),
                Connection::Client(c) => c.write_hs(&mut buf),
            };
            debug_assert!(key_change.is_none(), "no further key changes after 1-RTT in this core");
            if !buf.is_empty() {
                sink.add_handshake_data(self.write_level, &buf)?;
            }
        }
        Ok(())
    }

    fn set_transport_parameters(&mut self, _blob: &[u8]) -> Result<()> {
        // Baked in at construction (`RustlsQuicEngine::new_server`); see
        // that constructor's doc comment. A connection never renegotiates
        // transport parameters mid-handshake, so there's nothing to do.
        Ok(())
    }

    fn peer_transport_parameters(&self) -> Option<&[u8]> {
        match &self.conn {
            Connection::Server(c) => c.quic_transport_parameters(),
            Connection::Client(c) => c.quic_transport_parameters(),
        }
    }

    fn is_handshake_complete(&self) -> bool {
        match &self.conn {
            Connection::Server(c) => !c.is_handshaking(),
            Connection::Client(c) => !c.is_handshaking(),
        }
    }
}

/// rustls's `AlertDescription` carries the RFC 8446 §B.2 wire values as
/// its discriminant; map the handful this core's error taxonomy cares
/// about explicitly rather than relying on a numeric cast across crates.
fn alert_to_wire(alert: rustls::AlertDescription) -> u8 {
    use rustls::AlertDescription as A;
    match alert {
        A::CloseNotify => 0,
        A::HandshakeFailure => 40,
        A::BadCertificate => 42,
        A::UnsupportedCertificate => 43,
        A::CertificateExpired => 45,
        A::CertificateUnknown => 46,
        A::IllegalParameter => 47,
        A::UnknownCA => 48,
        A::DecodeError => 50,
        A::DecryptError => 51,
        A::ProtocolVersion => 70,
        A::InternalError => 80,
        A::MissingExtension => 109,
        A::UnrecognisedName => 112,
        A::NoApplicationProtocol => 120,
        _ => 80, // internal_error: this core doesn't distinguish the remainder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_named_alerts_to_their_rfc_8446_wire_value() {
        assert_eq!(alert_to_wire(rustls::AlertDescription::CloseNotify), 0);
        assert_eq!(alert_to_wire(rustls::AlertDescription::HandshakeFailure), 40);
        assert_eq!(alert_to_wire(rustls::AlertDescription::BadCertificate), 42);
        assert_eq!(alert_to_wire(rustls::AlertDescription::DecodeError), 50);
        assert_eq!(alert_to_wire(rustls::AlertDescription::ProtocolVersion), 70);
        assert_eq!(alert_to_wire(rustls::AlertDescription::NoApplicationProtocol), 120);
    }

    #[test]
    fn unrecognized_alert_falls_back_to_internal_error() {
        assert_eq!(alert_to_wire(rustls::AlertDescription::RecordOverflow), 80);
    }
}
