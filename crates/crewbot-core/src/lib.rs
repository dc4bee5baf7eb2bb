//! Core building blocks for Crewbot: the message envelope and bus,
//! chat types, the CAS file store, per-room sessions with compaction,
//! room models, configuration, and shared utilities.

pub mod bus;
pub mod cas;
pub mod config;
pub mod ids;
pub mod room;
pub mod session;
pub mod types;
pub mod utils;
