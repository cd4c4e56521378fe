//! Archive stream strategy: `tar` create / extract / list against the device

use super::{DeviceLock, Response, TapeReadWriteService};
use crate::error::{check_not_blank, check_relative_path, Result};
use crate::process::ProcessExecutor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const TAR_BLOCK: u64 = 512;
/// Two zero blocks close every archive
const TAR_TRAILER: u64 = 2 * TAR_BLOCK;

#[derive(Debug, Clone, Copy)]
pub struct ArchiveLimits {
    pub max_entry_size: u64,
    pub max_file_size: u64,
}

pub struct TarReadWriteService {
    device: String,
    tool: String,
    input_directory: PathBuf,
    output_directory: PathBuf,
    limits: ArchiveLimits,
    timeout: Duration,
    executor: Arc<dyn ProcessExecutor>,
    lock: DeviceLock,
}

impl TarReadWriteService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: &str,
        tool: &str,
        input_directory: &Path,
        output_directory: &Path,
        limits: ArchiveLimits,
        timeout: Duration,
        executor: Arc<dyn ProcessExecutor>,
        lock: DeviceLock,
    ) -> Result<Self> {
        check_not_blank("device", device)?;
        check_not_blank("archive tool", tool)?;
        check_not_blank("input directory", &input_directory.to_string_lossy())?;
        check_not_blank("output directory", &output_directory.to_string_lossy())?;

        Ok(Self {
            device: device.to_string(),
            tool: tool.to_string(),
            input_directory: input_directory.to_path_buf(),
            output_directory: output_directory.to_path_buf(),
            limits,
            timeout,
            executor,
            lock,
        })
    }

    async fn run(&self, args: Vec<String>) -> crate::process::Output {
        let _device = self.lock.lock().await;
        self.executor
            .execute(&self.tool, None, &args, self.timeout)
            .await
    }

    /// Reject sources whose entries or resulting archive exceed the configured limits
    async fn check_limits(&self, source: PathBuf) -> std::result::Result<u64, String> {
        let limits = self.limits;
        let scan = tokio::task::spawn_blocking(move || scan_entries(&source))
            .await
            .map_err(|e| format!("size scan aborted: {}", e))?
            .map_err(|e| format!("cannot scan source: {}", e))?;

        let mut archive_size = TAR_TRAILER;
        for (path, size) in &scan {
            if *size > limits.max_entry_size {
                return Err(format!(
                    "entry {:?} is {} bytes, above the maximum archive entry size of {} bytes",
                    path, size, limits.max_entry_size
                ));
            }
            archive_size += TAR_BLOCK + size.div_ceil(TAR_BLOCK) * TAR_BLOCK;
        }

        if archive_size > limits.max_file_size {
            return Err(format!(
                "archive would be {} bytes, above the maximum archive file size of {} bytes",
                archive_size, limits.max_file_size
            ));
        }
        Ok(archive_size)
    }
}

/// Regular files below `source` (or `source` itself) with their sizes
fn scan_entries(source: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let metadata = std::fs::metadata(source)?;
    if metadata.is_file() {
        return Ok(vec![(source.to_path_buf(), metadata.len())]);
    }

    let mut entries = Vec::new();
    let mut pending = vec![source.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                entries.push((entry.path(), metadata.len()));
            }
        }
    }
    Ok(entries)
}

#[async_trait]
impl TapeReadWriteService for TarReadWriteService {
    async fn write_to_tape(&self, source_path: &str, object_name: &str) -> Response {
        if let Err(e) = check_relative_path("source path", source_path) {
            return Response::ko(e.to_string());
        }
        let source = self.input_directory.join(source_path);
        let archive_size = match self.check_limits(source.clone()).await {
            Ok(size) => size,
            Err(reason) => {
                warn!("Refusing to archive {}: {}", object_name, reason);
                return Response::ko(reason);
            }
        };

        info!(
            "Archiving {} ({:?}, ~{} bytes) to {}",
            object_name, source, archive_size, self.device
        );
        let args = vec![
            "-c".to_string(),
            "-f".to_string(),
            self.device.clone(),
            "-C".to_string(),
            self.input_directory.display().to_string(),
            source_path.to_string(),
        ];
        Response::from_output(self.run(args).await)
    }

    async fn read_from_tape(&self, object_name: &str) -> Response {
        // Empty name extracts the whole archive
        if !object_name.is_empty() {
            if let Err(e) = check_relative_path("object name", object_name) {
                return Response::ko(e.to_string());
            }
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.output_directory).await {
            return Response::ko(format!("Cannot create {:?}: {}", self.output_directory, e));
        }

        info!("Extracting {} from {}", object_name, self.device);
        let mut args = vec![
            "-x".to_string(),
            "-f".to_string(),
            self.device.clone(),
            "-C".to_string(),
            self.output_directory.display().to_string(),
        ];
        if !object_name.is_empty() {
            args.push(object_name.to_string());
        }
        Response::from_output(self.run(args).await)
    }

    async fn list_entries(&self) -> Response<Vec<String>> {
        debug!("Listing archive entries on {}", self.device);
        let args = vec!["-t".to_string(), "-f".to_string(), self.device.clone()];
        let output = self.run(args).await;
        if !output.is_success() {
            return Response::failed(output);
        }

        let entries = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Response::ok(output, Some(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::new_device_lock;
    use crate::process::mock::MockExecutor;

    fn service(
        executor: Arc<MockExecutor>,
        input: &Path,
        output: &Path,
        limits: ArchiveLimits,
    ) -> TarReadWriteService {
        TarReadWriteService::new(
            "/dev/nst1",
            "/bin/tar",
            input,
            output,
            limits,
            Duration::from_secs(60),
            executor,
            new_device_lock(),
        )
        .unwrap()
    }

    fn generous() -> ArchiveLimits {
        ArchiveLimits {
            max_entry_size: 1_000_000,
            max_file_size: 10_000_000,
        }
    }

    #[test]
    fn test_constructor_rejects_blank_tool() {
        let executor: Arc<dyn ProcessExecutor> = Arc::new(MockExecutor::new());
        let result = TarReadWriteService::new(
            "/dev/nst1",
            "",
            Path::new("/tmp"),
            Path::new("/tmp"),
            generous(),
            Duration::from_secs(1),
            executor,
            new_device_lock(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_arguments() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::create_dir(input.path().join("batch")).unwrap();
        std::fs::write(input.path().join("batch/a"), vec![1u8; 100]).unwrap();
        std::fs::write(input.path().join("batch/b"), vec![2u8; 700]).unwrap();

        let executor = Arc::new(MockExecutor::new());
        let tar = service(executor.clone(), input.path(), output.path(), generous());
        let response = tar.write_to_tape("batch", "batch").await;

        assert!(response.is_ok());
        let calls = executor.calls();
        assert_eq!(
            calls[0].args,
            vec![
                "-c".to_string(),
                "-f".to_string(),
                "/dev/nst1".to_string(),
                "-C".to_string(),
                input.path().display().to_string(),
                "batch".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_entry_is_rejected_before_command() {
        let input = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("big"), vec![0u8; 2048]).unwrap();

        let executor = Arc::new(MockExecutor::new());
        let limits = ArchiveLimits {
            max_entry_size: 1024,
            max_file_size: 1_000_000,
        };
        let tar = service(executor.clone(), input.path(), input.path(), limits);

        let response = tar.write_to_tape("big", "big").await;
        assert!(!response.is_ok());
        assert!(response.diagnostic().contains("maximum archive entry size"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_archive_is_rejected_before_command() {
        let input = tempfile::tempdir().unwrap();
        std::fs::create_dir(input.path().join("many")).unwrap();
        for i in 0..4 {
            std::fs::write(input.path().join(format!("many/{}", i)), vec![0u8; 1000]).unwrap();
        }

        let executor = Arc::new(MockExecutor::new());
        let limits = ArchiveLimits {
            max_entry_size: 1000,
            max_file_size: 4096,
        };
        let tar = service(executor.clone(), input.path(), input.path(), limits);

        let response = tar.write_to_tape("many", "many").await;
        assert!(!response.is_ok());
        assert!(response.diagnostic().contains("maximum archive file size"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_paths_outside_staging_directories_are_ko() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let tar = service(executor.clone(), tmp.path(), tmp.path(), generous());

        assert!(!tar.write_to_tape("../etc", "etc").await.is_ok());
        assert!(!tar.read_from_tape("/etc/shadow").await.is_ok());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_parses_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        executor.push_result(0, "batch/\nbatch/a\nbatch/b\n", "");
        let tar = service(executor.clone(), tmp.path(), tmp.path(), generous());

        let response = tar.list_entries().await;
        assert!(response.is_ok());
        assert_eq!(
            response.entity().unwrap(),
            &vec!["batch/".to_string(), "batch/a".to_string(), "batch/b".to_string()]
        );
        assert_eq!(executor.calls()[0].args, vec!["-t", "-f", "/dev/nst1"]);
    }

    #[tokio::test]
    async fn test_extract_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let tar = service(executor.clone(), tmp.path(), tmp.path(), generous());

        assert!(tar.read_from_tape("batch/a").await.is_ok());
        assert_eq!(
            executor.calls()[0].args,
            vec![
                "-x".to_string(),
                "-f".to_string(),
                "/dev/nst1".to_string(),
                "-C".to_string(),
                tmp.path().display().to_string(),
                "batch/a".to_string(),
            ]
        );
    }
}
