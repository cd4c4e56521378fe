//! Tape Drive Services
//!
//! A drive is driven exclusively through external commands: a read/write
//! strategy (block copy with `dd`, or archive stream with `tar`) and the
//! positioning tool (`mt`). Every command targeting the device holds the
//! drive's [`DeviceLock`], so the worker loop and out-of-band status queries
//! never talk to the device at the same time.

pub mod command;
pub mod dd;
pub mod tar;

use crate::config::{DriveConf, DriveStrategy, TapeLibraryConfiguration};
use crate::error::Result;
use crate::process::{Output, ProcessExecutor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

pub use self::command::{DriveCommandService, DriveStatus};
pub use self::dd::DdReadWriteService;
pub use self::tar::{ArchiveLimits, TarReadWriteService};

/// Exclusive access to one tape device
pub type DeviceLock = Arc<Mutex<()>>;

pub fn new_device_lock() -> DeviceLock {
    Arc::new(Mutex::new(()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    Ok,
    Ko,
}

/// Outcome of a hardware command: OK/KO, the raw process output for
/// diagnosis and an optional parsed entity.
#[derive(Debug, Clone)]
pub struct Response<T = ()> {
    status: StatusCode,
    output: Option<Output>,
    entity: Option<T>,
    message: Option<String>,
}

impl<T> Response<T> {
    pub fn ok(output: Output, entity: Option<T>) -> Self {
        Self {
            status: StatusCode::Ok,
            output: Some(output),
            entity,
            message: None,
        }
    }

    /// KO response carrying the failed command output
    pub fn failed(output: Output) -> Self {
        let message = output.describe();
        Self {
            status: StatusCode::Ko,
            output: Some(output),
            entity: None,
            message: Some(message),
        }
    }

    /// KO response raised before any command was run
    pub fn ko<M: Into<String>>(message: M) -> Self {
        Self {
            status: StatusCode::Ko,
            output: None,
            entity: None,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn stderr(&self) -> &str {
        self.output.as_ref().map(|o| o.stderr.as_str()).unwrap_or("")
    }

    pub fn entity(&self) -> Option<&T> {
        self.entity.as_ref()
    }

    pub fn into_entity(self) -> Option<T> {
        self.entity
    }

    /// Diagnostic text for a KO response
    pub fn diagnostic(&self) -> String {
        match (&self.message, &self.output) {
            (Some(message), _) => message.clone(),
            (None, Some(output)) => output.describe(),
            (None, None) => format!("{:?}", self.status),
        }
    }
}

impl Response<()> {
    /// OK when the command exited with code 0, KO otherwise
    pub fn from_output(output: Output) -> Self {
        if output.is_success() {
            Response::ok(output, None)
        } else {
            Response::failed(output)
        }
    }
}

/// Moves data between local files and the tape device
#[async_trait]
pub trait TapeReadWriteService: Send + Sync {
    async fn write_to_tape(&self, source_path: &str, object_name: &str) -> Response;

    async fn read_from_tape(&self, object_name: &str) -> Response;

    async fn list_entries(&self) -> Response<Vec<String>>;
}

/// Everything needed to operate one drive
pub struct DriveService {
    conf: DriveConf,
    read_write: Box<dyn TapeReadWriteService>,
    command: DriveCommandService,
}

impl DriveService {
    pub fn new(
        conf: DriveConf,
        read_write: Box<dyn TapeReadWriteService>,
        command: DriveCommandService,
    ) -> Self {
        Self {
            conf,
            read_write,
            command,
        }
    }

    /// Build the configured strategy and positioning service around one shared device lock
    pub fn from_conf(
        conf: &DriveConf,
        config: &TapeLibraryConfiguration,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self> {
        conf.validate()?;
        let lock = new_device_lock();

        let read_write: Box<dyn TapeReadWriteService> = match conf.strategy {
            DriveStrategy::BlockCopy => Box::new(DdReadWriteService::new(
                &conf.device,
                &conf.block_copy_tool,
                &config.input_directory,
                &config.output_directory,
                conf.timeout(),
                executor.clone(),
                lock.clone(),
            )?),
            DriveStrategy::Archive => Box::new(TarReadWriteService::new(
                &conf.device,
                &conf.archive_tool,
                &config.input_directory,
                &config.output_directory,
                ArchiveLimits {
                    max_entry_size: config.max_archive_entry_size,
                    max_file_size: config.max_archive_file_size,
                },
                conf.timeout(),
                executor.clone(),
                lock.clone(),
            )?),
        };

        let command = DriveCommandService::new(
            &conf.device,
            &conf.positioning_tool,
            conf.timeout(),
            executor,
            lock,
        )?;

        Ok(Self::new(conf.clone(), read_write, command))
    }

    pub fn index(&self) -> u32 {
        self.conf.index
    }

    pub fn conf(&self) -> &DriveConf {
        &self.conf
    }

    pub fn read_write(&self) -> &dyn TapeReadWriteService {
        self.read_write.as_ref()
    }

    pub fn command(&self) -> &DriveCommandService {
        &self.command
    }
}
