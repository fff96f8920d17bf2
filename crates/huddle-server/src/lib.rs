//! # huddle-server
//!
//! HTTP surface of the Huddle room chat engine: configuration, admission
//! control (rate limiting, shared-secret auth, origin allow-list), the
//! WebSocket endpoint, status routes, and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod persistence;
pub mod ratelimit;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
