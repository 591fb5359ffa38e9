//! Supervision service for a networked industrial air compressor.
//!
//! The compressor's Delcos XL controller is reachable over Modbus TCP.
//! A single worker task polls its register blocks once a second, decodes
//! them into structured telemetry records, publishes the records to a
//! Redis sink, accepts remote power and reset commands, and keeps an
//! external supervisory state machine aligned with the observed device
//! state. Lost connections are retried under a bounded grace period
//! before they escalate to a supervisory fault.

pub mod bootstrap;
pub mod compressor;
pub mod config;
pub mod error;
pub mod health;
pub mod protocol;
pub mod registers;
pub mod session;
pub mod sink;
pub mod state;
pub mod supervisor;
