//! Pin Relay: webhook relay that keeps one pinned status message per stream.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod relay;
pub mod server;
pub mod store;
pub mod telemetry;
