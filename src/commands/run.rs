//! Run Command Handler
//!
//! Starts one worker per configured drive and serves orders until Ctrl-C,
//! then stops every worker, waiting at most the shutdown timeout.

use super::Context;
use std::sync::Arc;
use std::time::Duration;
use tape_library::queue::OrderQueue;
use tape_library::worker::{start_pool_workers, DriveWorker};
use tape_library::{Result, TapeLibraryError};
use tracing::{info, warn};

pub async fn execute(ctx: &Context, shutdown_timeout: u64) -> Result<()> {
    let queue: Arc<dyn OrderQueue> = ctx.queue.clone();

    let mut workers: Vec<DriveWorker> = Vec::new();
    for pool in ctx.registry.pools() {
        workers.extend(start_pool_workers(pool, queue.clone(), ctx.catalog.clone(), &ctx.config)?);
    }
    if workers.is_empty() {
        return Err(TapeLibraryError::config("No drive configured, nothing to run"));
    }
    info!("{} drive worker(s) running, press Ctrl-C to stop", workers.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    for worker in &workers {
        worker.request_stop();
    }
    let timeout = Duration::from_secs(shutdown_timeout);
    for worker in &workers {
        if !worker.stop_timeout(timeout).await {
            warn!(
                "[{}] drive {} did not finish its order within {:?}",
                worker.library(),
                worker.index(),
                timeout
            );
        }
        if let Some(result) = worker.last_result() {
            info!(
                "[{}] drive {} last order {}: {}",
                worker.library(),
                worker.index(),
                result.order_id,
                result.status
            );
        }
    }

    Ok(())
}
