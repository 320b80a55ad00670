//! Network hand-off
//!
//! Peer discovery and gossip live outside this crate; the shell only needs
//! somewhere to hand signed transactions.

pub mod relay;

pub use relay::{ChannelRelay, Relay};
