//! Transport layer for Matchroom
//!
//! This module implements:
//! - The [`SyncChannel`] abstraction rooms broadcast through
//! - [`InboundEvent`], the stream of client messages and disconnects
//! - [`LocalChannel`], an in-process implementation used by tests and the demo

pub mod local;
pub mod traits;

pub use local::{LocalChannel, LocalClient};
pub use traits::*;
