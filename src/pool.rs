//! Tape Library Pool and Registry
//!
//! A pool groups the robot of one physical library with its drive services.
//! The registry holds every pool and is built once at startup from the
//! configuration, then shared by handle.

use crate::config::TapeLibraryConfiguration;
use crate::drive::DriveService;
use crate::error::{Result, TapeLibraryError};
use crate::process::ProcessExecutor;
use crate::robot::RobotService;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub struct TapeLibraryPool {
    library: String,
    robot: Arc<RobotService>,
    drives: BTreeMap<u32, Arc<DriveService>>,
}

impl TapeLibraryPool {
    pub fn new(library: &str, robot: Arc<RobotService>, drives: Vec<Arc<DriveService>>) -> Self {
        Self {
            library: library.to_string(),
            robot,
            drives: drives.into_iter().map(|d| (d.index(), d)).collect(),
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn robot(&self) -> Arc<RobotService> {
        self.robot.clone()
    }

    pub fn drive(&self, index: u32) -> Option<Arc<DriveService>> {
        self.drives.get(&index).cloned()
    }

    /// Drives ordered by index
    pub fn drives(&self) -> impl Iterator<Item = &Arc<DriveService>> {
        self.drives.values()
    }

    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }
}

#[derive(Default)]
pub struct LibraryRegistry {
    pools: BTreeMap<String, Arc<TapeLibraryPool>>,
}

impl LibraryRegistry {
    pub fn from_config(
        config: &TapeLibraryConfiguration,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self> {
        let mut registry = LibraryRegistry::default();

        for (id, conf) in &config.libraries {
            let robot = Arc::new(RobotService::from_conf(id, &conf.robot, executor.clone())?);
            let drives = conf
                .drives
                .iter()
                .map(|drive| DriveService::from_conf(drive, config, executor.clone()).map(Arc::new))
                .collect::<Result<Vec<_>>>()?;

            info!(
                "Library {}: robot {} with {} drive(s)",
                id,
                conf.robot.device,
                drives.len()
            );
            registry.register(TapeLibraryPool::new(id, robot, drives));
        }

        Ok(registry)
    }

    pub fn register(&mut self, pool: TapeLibraryPool) {
        self.pools.insert(pool.library.clone(), Arc::new(pool));
    }

    pub fn pool(&self, library: &str) -> Result<Arc<TapeLibraryPool>> {
        self.pools
            .get(library)
            .cloned()
            .ok_or_else(|| TapeLibraryError::config(format!("Unknown library {}", library)))
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<TapeLibraryPool>> {
        self.pools.values()
    }
}
