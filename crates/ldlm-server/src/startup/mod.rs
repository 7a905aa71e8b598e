//! Application startup utilities.

mod http;
mod logging;
mod persistence;
mod shutdown;

pub use http::main_server;
pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use persistence::start_snapshot_task;
pub use shutdown::{ShutdownSignal, wait_for_termination};
