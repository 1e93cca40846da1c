//! Waypoint service crate
//!
//! Wires the decision core to its provider adapters and exposes it through
//! the `waypoint` CLI and HTTP service.

pub mod app_context;
pub mod cli;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod search;
pub mod server;
pub mod usage;

pub use app_context::AppContext;
pub use config::Config;
