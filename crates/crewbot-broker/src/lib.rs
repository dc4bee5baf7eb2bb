//! Per-room message brokers: FIFO+priority queues with write-ahead logs,
//! crash-safe replay, and at-most-one-in-flight processing per room.

pub mod broker;
pub mod manager;

pub use broker::{BrokerStats, MessageProcessor, RoomBroker};
pub use manager::RoomBrokerManager;
