//! Main entry point for the LDLM lock server.
//!
//! Loads configuration, restores saved state, starts the session reaper and
//! snapshot task, then serves HTTP until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use ldlm_core::LockService;
use ldlm_server::{
    metrics,
    model::Configuration,
    startup::{self, ShutdownSignal},
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;
    metrics::init_metrics();

    let options = configuration.lock_manager_options()?;
    info!(
        default_ttl_ms = options.default_ttl.as_millis() as u64,
        reaper_interval_ms = options.reaper_interval.as_millis() as u64,
        max_sessions = options.max_sessions,
        shared_batching = options.shared_batching,
        "Lock manager configured"
    );
    let service = Arc::new(LockService::new(options));

    let state_file = configuration.state_file();
    if let Some(path) = &state_file {
        service
            .restore_from_file(path)
            .await
            .with_context(|| format!("failed to restore state from {}", path.display()))?;
    }

    let shutdown = ShutdownSignal::new();
    let reaper_handle = service.reaper().start(shutdown.subscribe());
    let snapshot_handle = state_file.clone().map(|path| {
        startup::start_snapshot_task(
            service.clone(),
            path,
            configuration.state_save_interval(),
            shutdown.subscribe(),
        )
    });

    let address = configuration.server_address();
    let port = configuration.server_port();
    let grace = configuration.shutdown_timeout();
    let server = startup::main_server(service.clone(), address.clone(), port, grace.as_secs())
        .with_context(|| format!("failed to bind {}:{}", address, port))?;
    info!("LDLM server listening on {}:{}", address, port);

    let server_handle = server.handle();
    let mut server_task = actix_web::rt::spawn(server);

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = startup::wait_for_termination() => {
            info!("Stopping HTTP server, waiting up to {:?} for in-flight requests", grace);
            server_handle.stop(true).await;
            let _ = server_task.await;
        }
    }

    shutdown.shutdown();
    let _ = reaper_handle.await;
    if let Some(handle) = snapshot_handle {
        let _ = handle.await;
    }

    if let Some(path) = &state_file
        && let Err(e) = service.save_to_file(path).await
    {
        error!(path = %path.display(), error = %e, "Final snapshot failed");
    }

    info!("Shutdown complete");
    Ok(())
}
