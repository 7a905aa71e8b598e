//! LDLM Server - HTTP front end for the lease-based lock manager
//!
//! - `api` - HTTP handlers and routes
//! - `model` - Configuration and response types
//! - `startup` - Logging, HTTP server, snapshots and shutdown
//! - `metrics` - Metric descriptions

pub mod api;
pub mod metrics;
pub mod model;
pub mod startup;
