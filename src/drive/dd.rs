//! Block copy strategy: `<dd> if=<src> of=<dst>`

use super::{DeviceLock, Response, TapeReadWriteService};
use crate::error::{check_not_blank, check_relative_path, Result};
use crate::process::ProcessExecutor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DdReadWriteService {
    device: String,
    tool: String,
    input_directory: PathBuf,
    output_directory: PathBuf,
    timeout: Duration,
    executor: Arc<dyn ProcessExecutor>,
    lock: DeviceLock,
}

impl DdReadWriteService {
    pub fn new(
        device: &str,
        tool: &str,
        input_directory: &Path,
        output_directory: &Path,
        timeout: Duration,
        executor: Arc<dyn ProcessExecutor>,
        lock: DeviceLock,
    ) -> Result<Self> {
        check_not_blank("device", device)?;
        check_not_blank("block copy tool", tool)?;
        check_not_blank("input directory", &input_directory.to_string_lossy())?;
        check_not_blank("output directory", &output_directory.to_string_lossy())?;

        Ok(Self {
            device: device.to_string(),
            tool: tool.to_string(),
            input_directory: input_directory.to_path_buf(),
            output_directory: output_directory.to_path_buf(),
            timeout,
            executor,
            lock,
        })
    }

    async fn copy(&self, input: &Path, output: &Path) -> Response {
        let args = vec![
            format!("if={}", input.display()),
            format!("of={}", output.display()),
        ];

        let _device = self.lock.lock().await;
        let output = self
            .executor
            .execute(&self.tool, None, &args, self.timeout)
            .await;
        Response::from_output(output)
    }
}

#[async_trait]
impl TapeReadWriteService for DdReadWriteService {
    async fn write_to_tape(&self, source_path: &str, object_name: &str) -> Response {
        if let Err(e) = check_relative_path("source path", source_path) {
            return Response::ko(e.to_string());
        }
        let source = self.input_directory.join(source_path);
        if !source.is_file() {
            warn!("Cannot write {}: {:?} is not a file", object_name, source);
            return Response::ko(format!("Source file {:?} does not exist", source));
        }

        info!("Writing {} ({:?}) to {}", object_name, source, self.device);
        let response = self.copy(&source, Path::new(&self.device)).await;
        if !response.is_ok() {
            warn!("Write of {} failed: {}", object_name, response.diagnostic());
        }
        response
    }

    async fn read_from_tape(&self, object_name: &str) -> Response {
        if let Err(e) = check_relative_path("object name", object_name) {
            return Response::ko(e.to_string());
        }
        let destination = self.output_directory.join(object_name);
        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Response::ko(format!("Cannot create {:?}: {}", parent, e));
            }
        }

        info!("Reading {} from {} into {:?}", object_name, self.device, destination);
        let response = self.copy(Path::new(&self.device), &destination).await;
        if !response.is_ok() {
            warn!("Read of {} failed: {}", object_name, response.diagnostic());
        }
        response
    }

    async fn list_entries(&self) -> Response<Vec<String>> {
        debug!("Entry listing requested on block copy drive {}", self.device);
        Response::ko("Entry listing is not supported by the block copy strategy")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::new_device_lock;
    use crate::error::TapeLibraryError;
    use crate::process::mock::MockExecutor;

    fn service(executor: Arc<MockExecutor>, input: &Path, output: &Path) -> DdReadWriteService {
        DdReadWriteService::new(
            "/dev/nst0",
            "/bin/dd",
            input,
            output,
            Duration::from_secs(60),
            executor,
            new_device_lock(),
        )
        .unwrap()
    }

    #[test]
    fn test_constructor_rejects_blank_arguments() {
        let executor: Arc<dyn ProcessExecutor> = Arc::new(MockExecutor::new());
        let tmp = Path::new("/tmp");
        let cases = [
            ("", "/bin/dd", tmp, tmp),
            ("/dev/nst0", "", tmp, tmp),
            ("/dev/nst0", "/bin/dd", Path::new(""), tmp),
            ("/dev/nst0", "/bin/dd", tmp, Path::new("  ")),
        ];

        for (device, tool, input, output) in cases {
            let result = DdReadWriteService::new(
                device,
                tool,
                input,
                output,
                Duration::from_secs(1),
                executor.clone(),
                new_device_lock(),
            );
            assert!(matches!(result, Err(TapeLibraryError::ParameterValidation(_))));
        }
    }

    #[tokio::test]
    async fn test_write_arguments() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("obj.bin"), b"0123456789").unwrap();

        let executor = Arc::new(MockExecutor::new());
        let dd = service(executor.clone(), input.path(), output.path());
        let response = dd.write_to_tape("obj.bin", "obj").await;

        assert!(response.is_ok());
        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "/bin/dd");
        assert_eq!(
            calls[0].args,
            vec![
                format!("if={}", input.path().join("obj.bin").display()),
                "of=/dev/nst0".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_write_missing_source_is_ko_without_command() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let dd = service(executor.clone(), input.path(), output.path());

        let response = dd.write_to_tape("missing.bin", "missing").await;

        assert!(!response.is_ok());
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_keeps_stderr() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        executor.push_result(1, "", "dd: error reading '/dev/nst0': Input/output error");
        let dd = service(executor.clone(), input.path(), output.path());

        let response = dd.read_from_tape("obj").await;

        assert!(!response.is_ok());
        assert!(response.stderr().contains("Input/output error"));
        assert_eq!(
            executor.calls()[0].args,
            vec![
                "if=/dev/nst0".to_string(),
                format!("of={}", output.path().join("obj").display()),
            ]
        );
    }

    #[tokio::test]
    async fn test_paths_outside_staging_directories_are_ko() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let dd = service(executor.clone(), tmp.path(), tmp.path());

        assert!(!dd.write_to_tape("/etc/passwd", "passwd").await.is_ok());
        assert!(!dd.write_to_tape("../outside", "outside").await.is_ok());
        let read = dd.read_from_tape("../../tmp/evil").await;
        assert!(!read.is_ok());
        assert!(read.diagnostic().contains("relative path"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_not_supported() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::new());
        let dd = service(executor.clone(), tmp.path(), tmp.path());
        assert!(!dd.list_entries().await.is_ok());
        assert!(executor.calls().is_empty());
    }
}
