//! Data models
//!
//! - `config` - Configuration management
//! - `response` - HTTP error bodies

pub mod config;
pub mod response;

pub use config::{Cli, Configuration};
pub use response::ErrorResult;
