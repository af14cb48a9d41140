//! The per-connection handshake driver (spec §4.12): the loop that feeds
//! buffered CRYPTO data into the TLS engine, applies the secrets and
//! handshake bytes it produces back onto the connection, and advances
//! `Conn::state` as the handshake completes.

use tracing::{debug, info, warn};

use crate::conn::Conn;
use crate::crypto::schedule::LevelSecrets;
use crate::crypto::suite::CipherSuite;
use crate::error::{QuicError, Result};
use crate::level::EncryptionLevel;
use crate::pnspace::SpaceId;
use crate::tls::{HandshakeStatus, QuicMethodSink, QuicTlsEngine};

/// `QuicMethodSink` implemented on a `Conn` plus the raw-secret deriver a
/// concrete TLS engine needs (spec §4.10): callbacks hand back a *secret*
/// and a cipher suite, this core's own key schedule turns that into the
/// `{key, iv, hp_key}` triple packet protection uses.
pub struct ConnSink<'a> {
    pub conn: &'a mut Conn,
    pub pending_alert: Option<(EncryptionLevel, u8)>,
    pub flush_requested: bool,
}

impl<'a> ConnSink<'a> {
    pub fn new(conn: &'a mut Conn) -> Self {
        Self { conn, pending_alert: None, flush_requested: false }
    }
}

impl QuicMethodSink for ConnSink<'_> {
    fn install_read_secret(&mut self, level: EncryptionLevel, suite: CipherSuite, secret: &[u8]) -> Result<()> {
        let prk = crate::crypto::hkdf::Prk::from_secret(suite.md(), secret);
        let secrets = LevelSecrets::derive(suite, &prk);
        let pending = self.conn.level_mut(level).install_rx_secrets(secrets);
        debug!(%level, pending = pending.len(), "installed read secret");
        for packet in pending {
            // Reprocessing happens through the normal receive entry point;
            // the driver's caller re-feeds these via `reprocess_pending`.
            self.conn.level_mut(level).queue_rx_protected(packet.datagram, packet.packet_start);
        }
        Ok(())
    }

    fn install_write_secret(&mut self, level: EncryptionLevel, suite: CipherSuite, secret: &[u8]) -> Result<()> {
        let prk = crate::crypto::hkdf::Prk::from_secret(suite.md(), secret);
        let secrets = LevelSecrets::derive(suite, &prk);
        self.conn.level_mut(level).install_tx_secrets(secrets);
        debug!(%level, "installed write secret");
        Ok(())
    }

    fn add_handshake_data(&mut self, level: EncryptionLevel, bytes: &[u8]) -> Result<()> {
        if level == EncryptionLevel::ZeroRtt {
            return Err(QuicError::ProtocolViolation("TLS engine emitted 0-RTT handshake data".into()));
        }
        self.conn.level_mut(level).crypto_tx.append(bytes)?;
        self.flush_requested = true;
        Ok(())
    }

    fn flush_flight(&mut self) {
        self.flush_requested = true;
    }

    fn send_alert(&mut self, level: EncryptionLevel, alert: u8) {
        self.pending_alert = Some((level, alert));
    }
}

/// Result of one `Driver::advance` iteration, summarizing what the
/// caller (the listener's per-datagram loop) needs to act on.
pub struct DriveOutcome {
    pub should_send: bool,
    pub newly_confirmed: bool,
    pub fatal_alert: Option<(EncryptionLevel, u8)>,
}

pub struct Driver;

impl Driver {
    /// Feed every CRYPTO payload the receive pipeline produced this pass
    /// to the TLS engine, in the order they arrived, then drive the
    /// handshake state machine forward (spec §4.12 steps 1-3).
    pub fn advance(
        conn: &mut Conn,
        engine: &mut dyn QuicTlsEngine,
        crypto_in: &[(EncryptionLevel, Vec<u8>)],
    ) -> Result<DriveOutcome> {
        for (level, bytes) in crypto_in {
            engine.provide_quic_data(*level, bytes)?;
        }

        let was_confirmed = conn.is_handshake_confirmed();
        let mut sink = ConnSink::new(conn);
        let status = engine.do_handshake(&mut sink)?;
        engine.process_post_handshake(&mut sink)?;
        let should_send = sink.flush_requested || conn.retransmit;
        let fatal_alert = sink.pending_alert;

        if let Some((level, alert)) = fatal_alert {
            warn!(%level, alert, "TLS engine raised a fatal alert");
            return Ok(DriveOutcome { should_send, newly_confirmed: false, fatal_alert });
        }

        // Once Application-level read keys are installed, the TLS engine
        // has the peer's transport-parameters extension parsed out of the
        // ClientHello; decode and store it exactly once (spec §4.10: "After
        // INSTALL-READ on Application level, also decode the peer's
        // transport parameters").
        if conn.peer_params.is_none() && conn.level(EncryptionLevel::Application).has_rx_keys() {
            if let Some(blob) = engine.peer_transport_parameters() {
                let params = crate::transport_params::TransportParameters::decode(blob, true)?;
                conn.peer_params = Some(params);
            }
        }

        match status {
            HandshakeStatus::Complete if !was_confirmed => {
                conn.state = crate::conn::ConnState::Confirmed;
                conn.handshake_done_pending = true;
                conn.stats.record_handshake_confirmed(std::time::Instant::now());
                let active_cid_limit = conn.peer_params.as_ref().map(|p| p.active_connection_id_limit).unwrap_or(2);
                conn.issue_new_connection_ids(active_cid_limit);
                info!(cid = ?conn.scid, "handshake confirmed");
                Ok(DriveOutcome { should_send: true, newly_confirmed: true, fatal_alert: None })
            }
            HandshakeStatus::Complete | HandshakeStatus::WantRead | HandshakeStatus::WantWrite => {
                Ok(DriveOutcome { should_send, newly_confirmed: false, fatal_alert: None })
            }
        }
    }

    /// Re-run the receive pipeline over every packet a level's keys were
    /// missing for, now that `install_read_secret` has installed them
    /// (spec §4.5 `flush_pending_hp`). Returns the freshly-ready CRYPTO
    /// payloads, same shape as the listener's per-datagram output, so the
    /// caller can feed them back into `advance`.
    pub fn reprocess_pending(
        conn: &mut Conn,
        local_cid_len: usize,
    ) -> Result<Vec<(EncryptionLevel, Vec<u8>)>> {
        let mut crypto = Vec::new();
        for level in EncryptionLevel::all() {
            if !conn.level(level).has_rx_keys() || !conn.level(level).has_rx_pending() {
                continue;
            }
            let pending = conn.level_mut(level).take_rx_pending();
            for mut parked in pending {
                let mut on_crypto = |level: EncryptionLevel, bytes: &[u8]| crypto.push((level, bytes.to_vec()));
                let _ = crate::recv::process_one(conn, &mut parked.datagram, local_cid_len, &mut on_crypto)?;
            }
        }
        Ok(crypto)
    }

    /// Idle-timeout/draining bookkeeping (spec §5 "Cancellation and
    /// timeouts"): call once per housekeeping tick.
    pub fn check_idle_timeout(conn: &mut Conn, now: std::time::Instant) -> bool {
        let max_idle = std::time::Duration::from_millis(conn.local_params.max_idle_timeout.max(
            conn.peer_params.as_ref().map(|p| p.max_idle_timeout).unwrap_or(0),
        ));
        if conn.is_idle_timed_out(now, max_idle) {
            conn.enter_draining();
            true
        } else {
            false
        }
    }

    /// ACK-space progression: once an Initial-level packet has been
    /// acknowledged and the Handshake level has keys, Initial state can
    /// be dropped (spec §4.4 "discard Initial keys"). This core keeps
    /// the space bookkeeping around (it's cheap) and only uses this to
    /// decide whether Initial packets still need to be built.
    pub fn initial_still_needed(conn: &Conn) -> bool {
        let space = conn.space(SpaceId::Initial);
        !conn.level(EncryptionLevel::Initial).crypto_tx.is_empty()
            && conn.level(EncryptionLevel::Initial).crypto_tx.remaining_unsent() > 0
            || space.flags.ack_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ConnectionId;
    use crate::transport_params::TransportParameters;

    fn server_conn() -> Conn {
        let dcid = ConnectionId::from_slice(&[0x83, 0x94, 0xc8, 0xf0, 0x3e, 0x51, 0x57, 0x08]).unwrap();
        let scid = ConnectionId::from_slice(&[0x11; 8]).unwrap();
        let addr = "127.0.0.1:4433".parse().unwrap();
        Conn::new_server_conn(1, dcid, scid, addr, TransportParameters::default(), 8)
    }

    struct StubEngine {
        status: HandshakeStatus,
        to_write: Option<(EncryptionLevel, Vec<u8>)>,
    }

    impl QuicTlsEngine for StubEngine {
        fn provide_quic_data(&mut self, _level: EncryptionLevel, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }

        fn do_handshake(&mut self, sink: &mut dyn QuicMethodSink) -> Result<HandshakeStatus> {
            if let Some((level, bytes)) = self.to_write.take() {
                sink.add_handshake_data(level, &bytes)?;
            }
            Ok(self.status)
        }

        fn process_post_handshake(&mut self, _sink: &mut dyn QuicMethodSink) -> Result<()> {
            Ok(())
        }

        fn set_transport_parameters(&mut self, _blob: &[u8]) -> Result<()> {
            Ok(())
        }

        fn peer_transport_parameters(&self) -> Option<&[u8]> {
            None
        }

        fn is_handshake_complete(&self) -> bool {
            self.status == HandshakeStatus::Complete
        }
    }

    #[test]
    fn driver_appends_handshake_data_and_requests_send() {
        let mut conn = server_conn();
        let mut engine = StubEngine {
            status: HandshakeStatus::WantRead,
            to_write: Some((EncryptionLevel::Initial, b"server hello".to_vec())),
        };
        let outcome = Driver::advance(&mut conn, &mut engine, &[]).unwrap();
        assert!(outcome.should_send);
        assert!(!outcome.newly_confirmed);
        assert_eq!(conn.level(EncryptionLevel::Initial).crypto_tx.len(), b"server hello".len() as u64);
    }

    #[test]
    fn completion_marks_connection_confirmed() {
        let mut conn = server_conn();
        let mut engine = StubEngine { status: HandshakeStatus::Complete, to_write: None };
        let outcome = Driver::advance(&mut conn, &mut engine, &[]).unwrap();
        assert!(outcome.newly_confirmed);
        assert!(conn.is_handshake_confirmed());
    }
}
