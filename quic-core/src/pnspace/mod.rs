//! Packet-number space bookkeeping (spec §3/§4.4): one independent PN
//! domain each for Initial, Handshake, and Application (0-RTT shares
//! Application — this core never sends 0-RTT).

pub mod ack_ranges;
pub mod reconstruct;
pub mod space;

pub use ack_ranges::AckRangeSet;
pub use reconstruct::{reconstruct_pn, required_pn_length};
pub use space::{Space, SpaceId};
