//! TDMA-slotted UDP multicast: a lightweight time-division layer over IPv4
//! UDP multicast. Publisher processes share one multicast group and port;
//! each owns an integer slot, and a master process distributes the slot
//! geometry and a reference clock on slot 0 so every participant agrees on
//! "when now is" and "whose turn it is" without per-packet negotiation.
//!
//! This crate is the protocol runtime: wire codec, clock sync, slot
//! scheduling, and the per-channel send/receive state machine. It does not
//! provide reliable delivery, retransmission, encryption, or dynamic slot
//! arbitration — see the module docs below for what each piece actually
//! does.

pub mod channel;
pub mod clock;
pub mod codec;
pub mod error;
pub mod scheduler;
mod wire_io;

pub use channel::{Channel, ReceiveOutcome, Role};
pub use clock::{local_clock, master_clock_from};
pub use codec::{decode_sync_fields, encode_sync_fields, Header, HEADER_LEN};
pub use error::{Error, Result};
pub use scheduler::SlotGeometry;

/// Default multicast group address, per spec §6.
pub const DEFAULT_GROUP: std::net::Ipv4Addr = std::net::Ipv4Addr::new(224, 0, 0, 123);
/// Default UDP port, per spec §6.
pub const DEFAULT_PORT: u16 = 49234;
/// Default master-sync transmit interval, in microseconds, per spec §6.
pub const DEFAULT_SYNC_INTERVAL_US: u64 = 500_000;
