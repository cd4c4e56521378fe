//! Robot (Cartridge Exchanger) Control
//!
//! Wraps the exchanger tool: `<mtx> -f <device> status | load <slot> <drive> |
//! unload <slot> <drive>`. One instance per library. The arm mutex serialises
//! every invocation, so two drives of the same library never move the arm at
//! the same time.

pub mod status;

use crate::config::RobotConf;
use crate::drive::Response;
use crate::error::{check_not_blank, Result};
use crate::process::ProcessExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub use self::status::{DriveSlotSpec, LibrarySpec, StorageSlotSpec};

pub struct RobotService {
    library: String,
    device: String,
    tool: String,
    timeout: Duration,
    executor: Arc<dyn ProcessExecutor>,
    arm: Mutex<()>,
}

impl RobotService {
    pub fn new(
        library: &str,
        device: &str,
        tool: &str,
        timeout: Duration,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self> {
        check_not_blank("library", library)?;
        check_not_blank("robot device", device)?;
        check_not_blank("exchanger tool", tool)?;

        Ok(Self {
            library: library.to_string(),
            device: device.to_string(),
            tool: tool.to_string(),
            timeout,
            executor,
            arm: Mutex::new(()),
        })
    }

    pub fn from_conf(
        library: &str,
        conf: &RobotConf,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self> {
        conf.validate()?;
        Self::new(library, &conf.device, &conf.exchanger_tool, conf.timeout(), executor)
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    async fn run(&self, verb: &[String]) -> crate::process::Output {
        let mut args = vec!["-f".to_string(), self.device.clone()];
        args.extend(verb.iter().cloned());

        let _arm = self.arm.lock().await;
        self.executor
            .execute(&self.tool, None, &args, self.timeout)
            .await
    }

    pub async fn status(&self) -> Response<LibrarySpec> {
        let output = self.run(&["status".to_string()]).await;
        if !output.is_success() {
            error!("[Library] {}: status failed: {}", self.library, output.describe());
            return Response::failed(output);
        }

        match LibrarySpec::parse(&output.stdout) {
            Ok(spec) => {
                debug!(
                    "[Library] {}: {} drives, {} slots",
                    self.library, spec.drive_count, spec.slot_count
                );
                Response::ok(output, Some(spec))
            }
            Err(e) => Response::ko(format!("Cannot parse exchanger status: {}", e)),
        }
    }

    pub async fn load_tape(&self, slot: u32, drive: u32) -> Response {
        info!("[Library] {}: load slot {} -> drive {}", self.library, slot, drive);
        let output = self
            .run(&["load".to_string(), slot.to_string(), drive.to_string()])
            .await;
        let response = Response::from_output(output);
        if !response.is_ok() {
            error!("[Library] {}: load failed: {}", self.library, response.diagnostic());
        }
        response
    }

    pub async fn unload_tape(&self, slot: u32, drive: u32) -> Response {
        info!("[Library] {}: unload drive {} -> slot {}", self.library, drive, slot);
        let output = self
            .run(&["unload".to_string(), slot.to_string(), drive.to_string()])
            .await;
        let response = Response::from_output(output);
        if !response.is_ok() {
            error!("[Library] {}: unload failed: {}", self.library, response.diagnostic());
        }
        response
    }
}
