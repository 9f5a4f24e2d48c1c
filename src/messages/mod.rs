//! # Messages Module
//!
//! Mesh-side packet formats owned by the relay core.
//!
//! Vehicle frames crossing the mesh are opaque and only inspected through
//! [`crate::frame_inspector::FrameInspector`]. The relay core adds one family of its
//! own packets on the mesh channel: the discovery packets used to find, connect to
//! and keep alive a peer relay.

pub mod discovery_packet;

pub use discovery_packet::{
    is_discovery_magic, Announcement, DiscoveryPacket, DiscoveryPacketError, RejectionReason, HEARTBEAT_FROM_RELAY,
};
