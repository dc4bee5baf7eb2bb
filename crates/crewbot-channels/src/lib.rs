//! Channel adapters: the `Channel` trait every transport implements and
//! the manager that routes outbound envelopes from the bus.

pub mod base;
pub mod manager;

pub use base::Channel;
pub use manager::ChannelManager;
