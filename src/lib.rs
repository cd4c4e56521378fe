//! Tape Library Storage Backend
//!
//! Drives tape cartridges, drives and robotic exchangers through external
//! commands (`dd`, `tar`, `mt`, `mtx`), keeps a durable catalog of cartridge
//! locations and archived objects, and serves queued read/write orders with
//! one worker per drive.

pub mod catalog;
pub mod config;
pub mod drive;
pub mod error;
pub mod logger;
pub mod pool;
pub mod process;
pub mod queue;
pub mod robot;
pub mod store;
pub mod utils;
pub mod worker;

// Re-export key types for easier use
pub use catalog::{TapeCartridge, TapeCatalogService, TapeLocation};
pub use config::TapeLibraryConfiguration;
pub use drive::{DriveService, Response, TapeReadWriteService};
pub use error::{Result, TapeLibraryError};
pub use pool::{LibraryRegistry, TapeLibraryPool};
pub use process::{CommandExecutor, Output, ProcessExecutor};
pub use queue::{OrderQueue, QueueRepository, ReadOrder, ReadWriteOrder, WriteOrder};
pub use robot::RobotService;
pub use worker::{DriveWorker, DriveWorkerManager};
