//! Canonical address values used as routing keys.
//!
//! [`InnerAddr`] identifies a tunneled (inner) endpoint — an Ethernet MAC, an
//! IPv4/IPv6 host or CIDR prefix. [`OuterAddr`] identifies the transport-level
//! (real) endpoint a client instance is reached at.

mod frame;
mod inner;
mod outer;

pub use frame::{extract_from_packet, AddrClass, TunnelKind};
pub use inner::InnerAddr;
pub use outer::{OuterAddr, PacketInfo};
