//! External Process Execution
//!
//! Every hardware operation (robot arm, drive positioning, block copy, archive
//! stream) goes through this module as a bounded external command. A non-zero
//! exit code is reported in the returned [`Output`], never as an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

const SUDO_COMMAND: &str = "sudo";

/// Captured result of one external command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub command: String,
    pub args: Vec<String>,
    /// `None` when the process never exited by itself (spawn failure, timeout, signal)
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when the command could not be started at all
    pub spawn_error: Option<String>,
    pub elapsed_ms: u64,
}

impl Output {
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.spawn_error.is_none()
    }

    /// Short human readable summary for logs and KO diagnostics
    pub fn describe(&self) -> String {
        if self.timed_out {
            format!(
                "command '{}' timed out after {} ms",
                self.command_line(),
                self.elapsed_ms
            )
        } else if let Some(err) = &self.spawn_error {
            format!("command '{}' could not be started: {}", self.command_line(), err)
        } else {
            match self.exit_code {
                Some(code) => format!(
                    "command '{}' exited with code {}: {}",
                    self.command_line(),
                    code,
                    self.stderr.trim()
                ),
                None => format!(
                    "command '{}' was terminated by a signal: {}",
                    self.command_line(),
                    self.stderr.trim()
                ),
            }
        }
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Runs external commands with a bounded timeout.
///
/// Implementations must be safe to call concurrently for different devices;
/// serialisation of calls targeting the same device is the caller's job.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        args: &[String],
        timeout: Duration,
    ) -> Output;
}

/// Executor backed by real OS processes
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    use_sudo: bool,
}

impl CommandExecutor {
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    pub fn use_sudo(&self) -> bool {
        self.use_sudo
    }

    fn program_and_args(&self, command: &str, args: &[String]) -> (String, Vec<String>) {
        if self.use_sudo {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(command.to_string());
            full.extend(args.iter().cloned());
            (SUDO_COMMAND.to_string(), full)
        } else {
            (command.to_string(), args.to_vec())
        }
    }
}

#[async_trait]
impl ProcessExecutor for CommandExecutor {
    async fn execute(
        &self,
        command: &str,
        working_dir: Option<&Path>,
        args: &[String],
        timeout: Duration,
    ) -> Output {
        let (program, full_args) = self.program_and_args(command, args);
        let mut output = Output {
            command: program.clone(),
            args: full_args.clone(),
            ..Output::default()
        };

        debug!("Executing: {} (timeout {:?})", output.command_line(), timeout);

        let mut cmd = Command::new(&program);
        cmd.args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Cannot start '{}': {}", program, e);
                output.spawn_error = Some(e.to_string());
                return output;
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(result)) => {
                output.exit_code = result.status.code();
                output.stdout = String::from_utf8_lossy(&result.stdout).into_owned();
                output.stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            }
            Ok(Err(e)) => {
                warn!("Waiting for '{}' failed: {}", program, e);
                output.spawn_error = Some(e.to_string());
            }
            Err(_) => {
                warn!("'{}' exceeded {:?}, process killed", output.command_line(), timeout);
                output.timed_out = true;
            }
        }
        output.elapsed_ms = started.elapsed().as_millis() as u64;

        debug!(
            "Finished: {} -> exit={:?} timed_out={} ({} ms)",
            output.command_line(),
            output.exit_code,
            output.timed_out,
            output.elapsed_ms
        );

        output
    }
}
