use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tapelib")]
#[command(about = "Tape library storage backend: robot, drives, catalog and order queues")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Specify configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show drive and slot occupancy reported by a library's exchanger
    Status {
        /// Library id
        #[arg(value_name = "LIBRARY")]
        library: String,
    },

    /// Scan a library and reconcile the catalog with what it holds
    Inventory {
        /// Library id
        #[arg(value_name = "LIBRARY")]
        library: String,
    },

    /// Queue a file from the input directory for writing to tape
    SubmitWrite {
        /// Bucket the object belongs to
        #[arg(value_name = "BUCKET")]
        bucket: String,

        /// Path relative to the input directory
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Object name recorded in the archive catalog
        #[arg(value_name = "OBJECT")]
        object: String,

        /// Write on this cartridge instead of any available one
        #[arg(long, value_name = "CODE")]
        tape: Option<String>,
    },

    /// Queue archived objects for restore into the output directory
    SubmitRead {
        /// Bucket the objects belong to
        #[arg(value_name = "BUCKET")]
        bucket: String,

        /// Object names
        #[arg(value_name = "OBJECT", required = true)]
        objects: Vec<String>,
    },

    /// List catalogued cartridges
    Catalog {
        /// Only this library
        #[arg(value_name = "LIBRARY")]
        library: Option<String>,
    },

    /// Start one worker per configured drive until interrupted
    Run {
        /// Seconds to wait for in-flight orders on shutdown
        #[arg(long, default_value = "600")]
        shutdown_timeout: u64,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_write() {
        let cli = Cli::try_parse_from([
            "tapelib",
            "--config",
            "/etc/tape.toml",
            "submit-write",
            "objects",
            "in/file.bin",
            "obj-1",
            "--tape",
            "T001L6",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/tape.toml")));
        match cli.command {
            Commands::SubmitWrite {
                bucket,
                source,
                object,
                tape,
            } => {
                assert_eq!(bucket, "objects");
                assert_eq!(source, "in/file.bin");
                assert_eq!(object, "obj-1");
                assert_eq!(tape.as_deref(), Some("T001L6"));
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_submit_read_requires_objects() {
        assert!(Cli::try_parse_from(["tapelib", "submit-read", "objects"]).is_err());
        let cli =
            Cli::try_parse_from(["tapelib", "-v", "submit-read", "objects", "a", "b"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::SubmitRead { objects, .. } if objects.len() == 2));
    }
}
