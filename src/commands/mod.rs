//! Command Handlers Module
//!
//! This module contains handlers for all CLI subcommands. Every handler
//! starts from a [`Context`] built from the configuration file.

pub mod catalog;
pub mod inventory;
pub mod run;
pub mod status;
pub mod submit;

use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::Arc;
use tape_library::catalog::TapeCatalogService;
use tape_library::config::TapeLibraryConfiguration;
use tape_library::pool::LibraryRegistry;
use tape_library::process::CommandExecutor;
use tape_library::queue::QueueRepository;
use tape_library::store::{KeyValueStore, SqliteStore};
use tape_library::Result;
use tracing::debug;

/// Everything a command needs, built once from the configuration
pub struct Context {
    pub config: TapeLibraryConfiguration,
    pub registry: LibraryRegistry,
    pub catalog: Arc<TapeCatalogService>,
    pub queue: Arc<QueueRepository>,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let path = config_path
            .or_else(TapeLibraryConfiguration::default_path)
            .context("No configuration file given and no user configuration directory")?;
        let config = TapeLibraryConfiguration::load(&path)?;

        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&config.catalog_file)?);
        let executor = Arc::new(CommandExecutor::new(config.use_sudo));
        let registry = LibraryRegistry::from_config(&config, executor)?;
        debug!("Catalog and queues stored in {:?}", config.catalog_file);

        Ok(Self {
            catalog: Arc::new(TapeCatalogService::new(store.clone())),
            queue: Arc::new(QueueRepository::new(store)),
            registry,
            config,
        })
    }
}
