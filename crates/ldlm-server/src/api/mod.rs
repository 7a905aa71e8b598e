//! HTTP transport for the lock service
//!
//! JSON over HTTP. Protocol outcomes are HTTP 200 with a `status` field;
//! malformed input is HTTP 400 and internal failures HTTP 500.

pub mod health;
pub mod lock;
pub mod route;
pub mod session;

pub use route::routes;
