//! Message bus: the envelope type and the bounded queues connecting
//! channels, brokers, and the agent loop.

pub mod queue;
pub mod types;
