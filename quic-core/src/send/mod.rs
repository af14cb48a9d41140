//! The send path (spec §4.11/§4.12): per-packet construction and the
//! per-connection sequencing loop that drives the TX datagram ring.

pub mod builder;
pub mod ring;
pub mod sequencer;

pub use builder::{build_close_packet, build_packet, build_retransmit_packet, QUIC_INITIAL_PACKET_MINLEN};
pub use sequencer::drive_send;
