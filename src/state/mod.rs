//! Shared engine state.
//!
//! The registry owns every room; rooms own their members.

pub mod identity;
pub mod registry;
pub mod room;

pub use identity::{ClientIdentity, ConnectedClient, Presence};
pub use registry::RoomRegistry;
pub use room::Room;
