//! Drive positioning through the `mt` tool
//!
//! `mt -f <device> status | rewind | fsf N | bsfm N | offline`

use super::{DeviceLock, Response};
use crate::error::{check_not_blank, Result};
use crate::process::ProcessExecutor;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DENSITY: &str = "Density code";

/// Parsed `mt status` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStatus {
    pub file_number: Option<i64>,
    pub block_number: Option<i64>,
    pub density: Option<String>,
    pub status_bits: Vec<String>,
}

impl DriveStatus {
    pub fn parse(text: &str) -> Self {
        let mut status = DriveStatus::default();
        let mut in_bits = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with("File number=") {
                for part in line.trim_end_matches('.').split(',') {
                    let Some((key, value)) = part.trim().split_once('=') else {
                        continue;
                    };
                    let value = value.trim().parse().ok();
                    match key {
                        "File number" => status.file_number = value,
                        "block number" => status.block_number = value,
                        _ => {}
                    }
                }
            } else if let Some(pos) = line.find(DENSITY) {
                let density = line[pos + DENSITY.len()..].trim().trim_end_matches('.');
                status.density = Some(density.to_string());
            } else if line.starts_with("General status bits") {
                in_bits = true;
            } else if in_bits {
                status
                    .status_bits
                    .extend(line.split_whitespace().map(str::to_string));
            }
        }

        status
    }

    fn has_bit(&self, bit: &str) -> bool {
        self.status_bits.iter().any(|b| b == bit)
    }

    pub fn is_online(&self) -> bool {
        self.has_bit("ONLINE")
    }

    pub fn has_tape(&self) -> bool {
        !self.has_bit("DR_OPEN")
    }

    pub fn at_beginning(&self) -> bool {
        self.has_bit("BOT")
    }
}

pub struct DriveCommandService {
    device: String,
    tool: String,
    timeout: Duration,
    executor: Arc<dyn ProcessExecutor>,
    lock: DeviceLock,
}

impl DriveCommandService {
    pub fn new(
        device: &str,
        tool: &str,
        timeout: Duration,
        executor: Arc<dyn ProcessExecutor>,
        lock: DeviceLock,
    ) -> Result<Self> {
        check_not_blank("device", device)?;
        check_not_blank("positioning tool", tool)?;

        Ok(Self {
            device: device.to_string(),
            tool: tool.to_string(),
            timeout,
            executor,
            lock,
        })
    }

    async fn run(&self, verb: &[&str]) -> crate::process::Output {
        let mut args = vec!["-f".to_string(), self.device.clone()];
        args.extend(verb.iter().map(|s| s.to_string()));

        let _device = self.lock.lock().await;
        self.executor
            .execute(&self.tool, None, &args, self.timeout)
            .await
    }

    pub async fn status(&self) -> Response<DriveStatus> {
        let output = self.run(&["status"]).await;
        if !output.is_success() {
            return Response::failed(output);
        }
        let status = DriveStatus::parse(&output.stdout);
        debug!("Drive {} status: {:?}", self.device, status);
        Response::ok(output, Some(status))
    }

    pub async fn rewind(&self) -> Response {
        info!("Rewinding {}", self.device);
        Response::from_output(self.run(&["rewind"]).await)
    }

    /// Move `count` files forward, or backward to the start of the file `count` marks behind
    pub async fn move_files(&self, count: u32, backward: bool) -> Response {
        if count == 0 {
            return Response::ko("Cannot move by zero files");
        }
        let output = if backward {
            // bsfm lands after the mark, so one extra mark reaches the previous file start
            let marks = (count + 1).to_string();
            self.run(&["bsfm", &marks]).await
        } else {
            let marks = count.to_string();
            self.run(&["fsf", &marks]).await
        };
        Response::from_output(output)
    }

    /// Back to the start of the file the head is in (`bsfm 1`), for a head
    /// stopped inside a file. Not valid in file 0, which has no mark before it.
    pub async fn back_to_file_start(&self) -> Response {
        debug!("Returning {} to the start of the current file", self.device);
        Response::from_output(self.run(&["bsfm", "1"]).await)
    }

    /// Rewind and unload the cartridge so the robot can take it
    pub async fn eject(&self) -> Response {
        info!("Ejecting cartridge from {}", self.device);
        Response::from_output(self.run(&["offline"]).await)
    }
}
