//! Library crate root, exposing every module to the `tests/` integration
//! suite. The `chainpulse` binary (`main.rs`) declares its own copy of this
//! module tree rather than depending on this crate, following the bin/lib
//! split the teacher package already used.

pub mod api;
pub mod batch_writer;
pub mod cache;
pub mod chain_client;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod ranking;
pub mod scheduler;
pub mod statistics;
pub mod supervisor;
pub mod telemetry;
pub mod token_registry;
pub mod types;
pub mod watermark;
pub mod websocket;
