//! Tape Library Configuration
//!
//! TOML configuration describing the physical libraries (robot + drives), the
//! logical topology (bucket -> library) and the global limits shared by every
//! drive service.

use crate::error::{check_not_blank, Result, TapeLibraryError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Which order type a drive worker serves first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadWritePriority {
    Read,
    Write,
}

impl std::fmt::Display for ReadWritePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadWritePriority::Read => write!(f, "READ"),
            ReadWritePriority::Write => write!(f, "WRITE"),
        }
    }
}

/// Drive I/O strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriveStrategy {
    /// Raw device copy (`dd`)
    BlockCopy,
    /// Archive stream (`tar`)
    Archive,
}

impl Default for DriveStrategy {
    fn default() -> Self {
        DriveStrategy::BlockCopy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveConf {
    pub index: u32,
    pub device: String,
    #[serde(default = "default_block_copy_tool")]
    pub block_copy_tool: String,
    #[serde(default = "default_archive_tool")]
    pub archive_tool: String,
    #[serde(default = "default_positioning_tool")]
    pub positioning_tool: String,
    #[serde(default = "default_priority")]
    pub priority: ReadWritePriority,
    #[serde(default = "default_drive_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub strategy: DriveStrategy,
}

impl DriveConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        check_not_blank("drive device", &self.device)?;
        check_not_blank("block copy tool", &self.block_copy_tool)?;
        check_not_blank("archive tool", &self.archive_tool)?;
        check_not_blank("positioning tool", &self.positioning_tool)?;
        if self.timeout_ms == 0 {
            return Err(TapeLibraryError::config(format!(
                "drive {} timeout must be greater than zero",
                self.index
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotConf {
    pub device: String,
    #[serde(default = "default_exchanger_tool")]
    pub exchanger_tool: String,
    #[serde(default = "default_robot_timeout_ms")]
    pub timeout_ms: u64,
}

impl RobotConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        check_not_blank("robot device", &self.device)?;
        check_not_blank("exchanger tool", &self.exchanger_tool)?;
        if self.timeout_ms == 0 {
            return Err(TapeLibraryError::config("robot timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConf {
    pub robot: RobotConf,
    #[serde(default)]
    pub drives: Vec<DriveConf>,
}

/// Whole-system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeLibraryConfiguration {
    /// Prefix every external command with `sudo`
    #[serde(default)]
    pub use_sudo: bool,
    #[serde(default = "default_max_archive_entry_size")]
    pub max_archive_entry_size: u64,
    #[serde(default = "default_max_archive_file_size")]
    pub max_archive_file_size: u64,
    /// Directory holding files waiting to be written to tape
    pub input_directory: PathBuf,
    /// Directory receiving files read back from tape
    pub output_directory: PathBuf,
    /// JSON file backing the catalog and the order queues
    #[serde(default = "default_catalog_file")]
    pub catalog_file: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A failed write on a cartridge holding at least this much data marks it full
    #[serde(default = "default_full_cartridge_threshold_mb")]
    pub full_cartridge_threshold_mb: u64,
    /// bucket -> library id
    #[serde(default)]
    pub topology: BTreeMap<String, String>,
    #[serde(default)]
    pub libraries: BTreeMap<String, LibraryConf>,
}

impl TapeLibraryConfiguration {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration: {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapeLibraryError::config(format!("Cannot read configuration {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| TapeLibraryError::config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        debug!(
            "Configuration loaded: {} libraries, {} buckets",
            config.libraries.len(),
            config.topology.len()
        );
        Ok(config)
    }

    /// `<user config dir>/tape-library/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tape-library").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        check_not_blank("input directory", &self.input_directory.to_string_lossy())?;
        check_not_blank("output directory", &self.output_directory.to_string_lossy())?;

        if self.max_archive_entry_size == 0 || self.max_archive_file_size == 0 {
            return Err(TapeLibraryError::config("archive size limits must be greater than zero"));
        }
        if self.max_archive_entry_size > self.max_archive_file_size {
            return Err(TapeLibraryError::config(format!(
                "max_archive_entry_size ({}) cannot exceed max_archive_file_size ({})",
                self.max_archive_entry_size, self.max_archive_file_size
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(TapeLibraryError::config("poll_interval_ms must be greater than zero"));
        }

        for (id, library) in &self.libraries {
            check_not_blank("library id", id)?;
            library.robot.validate()?;

            let mut indexes = BTreeSet::new();
            for drive in &library.drives {
                drive.validate()?;
                if !indexes.insert(drive.index) {
                    return Err(TapeLibraryError::config(format!(
                        "library {} declares drive {} twice",
                        id, drive.index
                    )));
                }
            }
        }

        for (bucket, library) in &self.topology {
            if !self.libraries.contains_key(library) {
                return Err(TapeLibraryError::config(format!(
                    "bucket {} references unknown library {}",
                    bucket, library
                )));
            }
        }

        Ok(())
    }

    pub fn library_for_bucket(&self, bucket: &str) -> Result<&str> {
        self.topology
            .get(bucket)
            .map(String::as_str)
            .ok_or_else(|| {
                TapeLibraryError::config(format!("No library configured for bucket {}", bucket))
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn full_cartridge_threshold_bytes(&self) -> u64 {
        self.full_cartridge_threshold_mb.saturating_mul(1_000_000)
    }
}

fn default_block_copy_tool() -> String {
    "/bin/dd".to_string()
}

fn default_archive_tool() -> String {
    "/bin/tar".to_string()
}

fn default_positioning_tool() -> String {
    "/bin/mt".to_string()
}

fn default_exchanger_tool() -> String {
    "/usr/sbin/mtx".to_string()
}

fn default_priority() -> ReadWritePriority {
    ReadWritePriority::Write
}

fn default_drive_timeout_ms() -> u64 {
    3_600_000
}

fn default_robot_timeout_ms() -> u64 {
    300_000
}

fn default_max_archive_entry_size() -> u64 {
    1_000_000_000
}

fn default_max_archive_file_size() -> u64 {
    10_000_000_000
}

fn default_catalog_file() -> PathBuf {
    PathBuf::from("tape-catalog.db")
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_full_cartridge_threshold_mb() -> u64 {
    // 90% of an LTO-6 native capacity
    2_250_000
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
use_sudo = true
max_archive_entry_size = 1000
max_archive_file_size = 5000
input_directory = "/var/lib/tape/input"
output_directory = "/var/lib/tape/output"

[topology]
objects = "lib-a"
logbook = "lib-a"

[libraries.lib-a.robot]
device = "/dev/sg0"

[[libraries.lib-a.drives]]
index = 0
device = "/dev/nst0"
priority = "read"
strategy = "archive"

[[libraries.lib-a.drives]]
index = 1
device = "/dev/nst1"
timeout_ms = 5000
"#;

    #[test]
    fn test_parse_sample() {
        let config = TapeLibraryConfiguration::from_toml_str(SAMPLE).unwrap();

        assert!(config.use_sudo);
        assert_eq!(config.library_for_bucket("objects").unwrap(), "lib-a");
        let library = &config.libraries["lib-a"];
        assert_eq!(library.robot.exchanger_tool, "/usr/sbin/mtx");
        assert_eq!(library.drives.len(), 2);
        assert_eq!(library.drives[0].priority, ReadWritePriority::Read);
        assert_eq!(library.drives[0].strategy, DriveStrategy::Archive);
        assert_eq!(library.drives[1].priority, ReadWritePriority::Write);
        assert_eq!(library.drives[1].strategy, DriveStrategy::BlockCopy);
        assert_eq!(library.drives[1].timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_unknown_bucket() {
        let config = TapeLibraryConfiguration::from_toml_str(SAMPLE).unwrap();
        assert!(config.library_for_bucket("missing").is_err());
    }

    #[test]
    fn test_topology_must_reference_known_library() {
        let broken = SAMPLE.replace("logbook = \"lib-a\"", "logbook = \"lib-z\"");
        let err = TapeLibraryConfiguration::from_toml_str(&broken).unwrap_err();
        assert!(matches!(err, TapeLibraryError::Config(_)));
    }

    #[test]
    fn test_empty_device_is_rejected() {
        let broken = SAMPLE.replace("device = \"/dev/nst1\"", "device = \"\"");
        let err = TapeLibraryConfiguration::from_toml_str(&broken).unwrap_err();
        assert!(matches!(err, TapeLibraryError::ParameterValidation(_)));
    }

    #[test]
    fn test_duplicate_drive_index_is_rejected() {
        let broken = SAMPLE.replace("index = 1", "index = 0");
        assert!(TapeLibraryConfiguration::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_entry_limit_cannot_exceed_file_limit() {
        let broken =
            SAMPLE.replace("max_archive_entry_size = 1000", "max_archive_entry_size = 9000");
        assert!(TapeLibraryConfiguration::from_toml_str(&broken).is_err());
    }
}
