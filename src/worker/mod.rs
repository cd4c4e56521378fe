//! Drive Workers
//!
//! One tokio task per drive. The task polls the [`DriveWorkerManager`] for the
//! next order, hands it to an [`OrderExecutor`] and records the outcome. When
//! both queues are empty it sleeps for the poll interval.
//!
//! Stopping is cooperative: the cancellation token is only observed between
//! orders, so a running tape command is never interrupted.

pub mod manager;
pub mod task;

pub use self::manager::{arbitration_order, DriveWorkerInfo, DriveWorkerManager};
pub use self::task::DriveTask;

use crate::catalog::TapeCatalogService;
use crate::config::{ReadWritePriority, TapeLibraryConfiguration};
use crate::error::{Result, TapeLibraryError};
use crate::pool::TapeLibraryPool;
use crate::queue::{OrderQueue, OrderStatus, ReadWriteOrder};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one executed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub message: Option<String>,
}

impl OrderResult {
    pub fn ok(order_id: Uuid) -> Self {
        Self {
            order_id,
            status: OrderStatus::Ok,
            message: None,
        }
    }

    pub fn ko<M: Into<String>>(order_id: Uuid, message: M) -> Self {
        Self {
            order_id,
            status: OrderStatus::Ko,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OrderStatus::Ok
    }
}

/// State shared between a worker handle and its task
#[derive(Debug, Default)]
pub struct WorkerState {
    running: AtomicBool,
    current_tape: RwLock<Option<String>>,
    last_result: RwLock<Option<OrderResult>>,
}

impl WorkerState {
    pub fn set_current_tape(&self, code: Option<&str>) {
        *self.current_tape.write() = code.map(str::to_string);
    }

    pub fn current_tape(&self) -> Option<String> {
        self.current_tape.read().clone()
    }

    fn set_last_result(&self, result: OrderResult) {
        *self.last_result.write() = Some(result);
    }
}

/// Carries out one claimed order on the worker's drive
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute(&self, order: &ReadWriteOrder, state: &WorkerState) -> OrderResult;
}

#[derive(Debug, Clone, Copy)]
struct WorkerIdentity {
    index: u32,
    priority: ReadWritePriority,
}

impl DriveWorkerInfo for WorkerIdentity {
    fn index(&self) -> u32 {
        self.index
    }

    fn priority(&self) -> ReadWritePriority {
        self.priority
    }
}

pub struct DriveWorker {
    identity: WorkerIdentity,
    library: String,
    state: Arc<WorkerState>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DriveWorker {
    /// Spawn the worker loop on the current tokio runtime
    pub fn start(
        index: u32,
        priority: ReadWritePriority,
        manager: Arc<DriveWorkerManager>,
        executor: Arc<dyn OrderExecutor>,
        poll_interval: Duration,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(TapeLibraryError::parameter_validation(
                "worker poll interval must be greater than zero",
            ));
        }

        let identity = WorkerIdentity { index, priority };
        let library = manager.library().to_string();
        let state = Arc::new(WorkerState::default());
        state.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        info!(
            "[{}] starting worker for drive {} ({} priority)",
            library, index, priority
        );
        let handle = tokio::spawn(run_loop(
            identity,
            manager,
            executor,
            state.clone(),
            cancel.clone(),
            poll_interval,
        ));

        Ok(Self {
            identity,
            library,
            state,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn index(&self) -> u32 {
        self.identity.index
    }

    pub fn priority(&self) -> ReadWritePriority {
        self.identity.priority
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn last_result(&self) -> Option<OrderResult> {
        self.state.last_result.read().clone()
    }

    pub fn current_tape(&self) -> Option<String> {
        self.state.current_tape()
    }

    /// Signal the loop to exit after the current order, without waiting
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Ask the loop to exit and wait until the current order, if any, is done
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("[{}] worker {} ended abnormally: {}", self.library, self.index(), e);
            }
        }
        self.state.running.store(false, Ordering::SeqCst);
    }

    /// Like [`stop`](Self::stop) but gives up waiting after `timeout`.
    ///
    /// Returns `false` when the loop was still busy. The worker then reports
    /// itself as not running; the in-flight order completes in the background
    /// and a later `stop()` still waits for it.
    pub async fn stop_timeout(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(mut handle) = self.handle.lock().take() else {
            self.state.running.store(false, Ordering::SeqCst);
            return true;
        };

        let finished = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("[{}] worker {} ended abnormally: {}", self.library, self.index(), e);
                true
            }
            Err(_) => {
                warn!(
                    "[{}] worker {} still busy after {:?}, detaching",
                    self.library,
                    self.index(),
                    timeout
                );
                *self.handle.lock() = Some(handle);
                false
            }
        };
        self.state.running.store(false, Ordering::SeqCst);
        finished
    }
}

impl DriveWorkerInfo for DriveWorker {
    fn index(&self) -> u32 {
        self.identity.index
    }

    fn priority(&self) -> ReadWritePriority {
        self.identity.priority
    }
}

/// Start one worker per drive of `pool`
pub fn start_pool_workers(
    pool: &TapeLibraryPool,
    queue: Arc<dyn OrderQueue>,
    catalog: Arc<TapeCatalogService>,
    config: &TapeLibraryConfiguration,
) -> Result<Vec<DriveWorker>> {
    let manager = Arc::new(DriveWorkerManager::new(pool.library(), queue));

    pool.drives()
        .map(|drive| {
            let task = DriveTask::new(
                pool.library(),
                drive.clone(),
                pool.robot(),
                catalog.clone(),
                &config.input_directory,
                &config.output_directory,
                config.full_cartridge_threshold_bytes(),
            )?;
            DriveWorker::start(
                drive.index(),
                drive.conf().priority,
                manager.clone(),
                Arc::new(task),
                config.poll_interval(),
            )
        })
        .collect()
}

async fn run_loop(
    identity: WorkerIdentity,
    manager: Arc<DriveWorkerManager>,
    executor: Arc<dyn OrderExecutor>,
    state: Arc<WorkerState>,
    cancel: CancellationToken,
    poll_interval: Duration,
) {
    let library = manager.library().to_string();

    while !cancel.is_cancelled() {
        let order = match manager.consume(&identity) {
            Some(order) => order,
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
                continue;
            }
        };

        info!(
            "[{}] drive {} executing {} order {}",
            library,
            identity.index,
            order.order_type(),
            order.id()
        );
        let result = executor.execute(&order, &state).await;
        if result.is_ok() {
            info!("[{}] order {} OK", library, result.order_id);
        } else {
            error!(
                "[{}] order {} KO: {}",
                library,
                result.order_id,
                result.message.as_deref().unwrap_or("")
            );
        }

        if let Err(e) = manager.complete(result.order_id, result.status, result.message.clone()) {
            error!("[{}] cannot record outcome of order {}: {}", library, result.order_id, e);
        }
        state.set_last_result(result);
    }

    debug!("[{}] worker {} loop exited", library, identity.index);
    state.running.store(false, Ordering::SeqCst);
}
