//! Order execution on one drive
//!
//! Mounting swaps cartridges through the robot (eject, unload to the home
//! slot, load, rewind, label check), positioning moves the head to a file
//! mark, then the drive's read/write strategy does the transfer. Blank
//! cartridges receive a label as file 0 before their first data file. Every
//! step that succeeds is reflected in the catalog right away, so a failure
//! leaves the catalog at the last completed step.

use super::{OrderExecutor, OrderResult, WorkerState};
use crate::catalog::{
    ArchiveLocation, CartridgeConstraints, CartridgeStatus, TapeCartridge, TapeCatalogService,
    TapeLabel, TapeLocation,
};
use crate::drive::{DriveService, Response};
use crate::error::{check_not_blank, check_relative_path, Result, TapeLibraryError};
use crate::queue::{ReadOrder, ReadWriteOrder, WriteOrder};
use crate::robot::RobotService;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Directory, relative to the staging directories, holding label files in transit
const LABEL_DIRECTORY: &str = ".tape-labels";

pub struct DriveTask {
    library: String,
    drive: Arc<DriveService>,
    robot: Arc<RobotService>,
    catalog: Arc<TapeCatalogService>,
    input_directory: PathBuf,
    output_directory: PathBuf,
    full_threshold_bytes: u64,
}

impl DriveTask {
    pub fn new(
        library: &str,
        drive: Arc<DriveService>,
        robot: Arc<RobotService>,
        catalog: Arc<TapeCatalogService>,
        input_directory: &Path,
        output_directory: &Path,
        full_threshold_bytes: u64,
    ) -> Result<Self> {
        check_not_blank("library", library)?;
        check_not_blank("input directory", &input_directory.to_string_lossy())?;
        check_not_blank("output directory", &output_directory.to_string_lossy())?;
        if robot.library() != library {
            return Err(TapeLibraryError::parameter_validation(format!(
                "robot of library {} cannot serve drive {} of library {}",
                robot.library(),
                drive.index(),
                library
            )));
        }

        Ok(Self {
            library: library.to_string(),
            drive,
            robot,
            catalog,
            input_directory: input_directory.to_path_buf(),
            output_directory: output_directory.to_path_buf(),
            full_threshold_bytes,
        })
    }

    fn drive_location(&self) -> TapeLocation {
        TapeLocation::Drive(self.drive.index())
    }

    fn mounted(&self) -> Result<Option<TapeCartridge>> {
        self.catalog.find_by_location(&self.library, self.drive_location())
    }

    /// Make sure `code` is the cartridge in the drive
    async fn mount(&self, code: &str, state: &WorkerState) -> Result<()> {
        let current = self.mounted()?;
        if let Some(current) = &current {
            if current.code == code {
                state.set_current_tape(Some(code));
                return Ok(());
            }
        }

        let tape = self.catalog.get_cartridge(code)?;
        if tape.library != self.library {
            return Err(TapeLibraryError::catalog(format!(
                "Cartridge {} belongs to library {}",
                code, tape.library
            )));
        }
        let tape = self.catalog.reserve_cartridge(code, self.drive.index())?;

        let result = self.swap_in(&tape, current.as_ref(), state).await;
        if result.is_err() {
            if let Err(e) = self.catalog.release_cartridge(code, self.drive.index()) {
                warn!("Cannot release cartridge {}: {}", code, e);
            }
        }
        result
    }

    /// Unload the current cartridge, load `tape` and check its label
    async fn swap_in(
        &self,
        tape: &TapeCartridge,
        current: Option<&TapeCartridge>,
        state: &WorkerState,
    ) -> Result<()> {
        if let Some(current) = current {
            self.unmount(current, state).await?;
        }

        let slot = tape.current_location.slot_index().ok_or_else(|| {
            TapeLibraryError::catalog(format!(
                "Cartridge {} is at {}, not in a slot",
                tape.code, tape.current_location
            ))
        })?;

        check(
            self.robot.load_tape(slot, self.drive.index()).await,
            TapeLibraryError::robot,
        )?;
        let tape = self.catalog.update_location(
            &tape.code,
            self.drive_location(),
            CartridgeStatus::Mounted,
        )?;
        state.set_current_tape(Some(&tape.code));

        check(self.drive.command().rewind().await, TapeLibraryError::tape_command)?;
        if let Some(expected) = &tape.label {
            self.verify_label(&tape.code, expected).await?;
        }
        Ok(())
    }

    /// Eject the cartridge and put it back in its home slot
    async fn unmount(&self, tape: &TapeCartridge, state: &WorkerState) -> Result<()> {
        info!(
            "[{}] drive {}: unmounting {}",
            self.library,
            self.drive.index(),
            tape.code
        );
        check(self.drive.command().eject().await, TapeLibraryError::tape_command)?;

        let home = match tape.previous_location.filter(|l| l.slot_index().is_some()) {
            Some(home) => home,
            None => self.free_slot().await?,
        };
        let slot = home.slot_index().unwrap_or_default();

        check(
            self.robot.unload_tape(slot, self.drive.index()).await,
            TapeLibraryError::robot,
        )?;
        state.set_current_tape(None);

        // Status as stored now, not as seen when the order started
        let status = match self.catalog.get_cartridge(&tape.code)?.status {
            CartridgeStatus::InError => CartridgeStatus::InError,
            _ => CartridgeStatus::Available,
        };
        self.catalog.update_location(&tape.code, home, status)?;
        Ok(())
    }

    /// First empty storage slot the exchanger reports
    async fn free_slot(&self) -> Result<TapeLocation> {
        let response = self.robot.status().await;
        if !response.is_ok() {
            return Err(TapeLibraryError::robot(response.diagnostic()));
        }
        response
            .entity()
            .and_then(|spec| spec.empty_slots().next())
            .map(|slot| TapeLocation::Slot(slot.index))
            .ok_or_else(|| TapeLibraryError::robot("No empty slot to unload the drive"))
    }

    /// Move the head to the start of file `target`
    async fn position(&self, target: u32) -> Result<()> {
        let command = self.drive.command();
        let status = command.status().await.into_entity();
        let current = status
            .as_ref()
            .and_then(|s| s.file_number)
            .and_then(|n| u32::try_from(n).ok());
        let at_file_start = status.as_ref().and_then(|s| s.block_number) == Some(0);
        debug!(
            "[{}] drive {}: head at file {:?} (start: {}), target {}",
            self.library,
            self.drive.index(),
            current,
            at_file_start,
            target
        );

        let response = match current {
            Some(current) if current == target && at_file_start => return Ok(()),
            Some(current) if current == target && target > 0 => {
                command.back_to_file_start().await
            }
            Some(current) if current < target => {
                command.move_files(target - current, false).await
            }
            Some(current) if current > target && target > 0 => {
                command.move_files(current - target, true).await
            }
            _ => {
                check(command.rewind().await, TapeLibraryError::tape_command)?;
                if target == 0 {
                    return Ok(());
                }
                command.move_files(target, false).await
            }
        };
        check(response, TapeLibraryError::tape_command)
    }

    fn label_path(code: &str) -> String {
        format!("{}/{}.json", LABEL_DIRECTORY, code)
    }

    /// Write the identity label of a blank cartridge as its file 0
    async fn write_label(&self, tape: &TapeCartridge) -> Result<TapeCartridge> {
        let label = TapeLabel::for_cartridge(tape);
        let path = Self::label_path(&tape.code);
        let local = self.input_directory.join(&path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, serde_json::to_vec_pretty(&label)?).await?;

        info!("Labelling cartridge {}", tape.code);
        let written = match self.position(0).await {
            Ok(()) => {
                let response = self.drive.read_write().write_to_tape(&path, &path).await;
                check(response, TapeLibraryError::tape_command)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_file(&local).await {
            warn!("Cannot remove label file {:?}: {}", local, e);
        }
        if let Err(e) = written {
            self.record_write_failure(&tape.code);
            return Err(e);
        }

        self.catalog.update_with(&tape.code, |t| {
            t.label = Some(label);
            t.file_count = 1;
            t.current_position = 1;
        })
    }

    /// Read file 0 back and compare it with the catalogued label
    async fn verify_label(&self, code: &str, expected: &TapeLabel) -> Result<()> {
        let path = Self::label_path(code);
        check(
            self.drive.read_write().read_from_tape(&path).await,
            TapeLibraryError::tape_command,
        )?;

        let local = self.output_directory.join(&path);
        let found = tokio::fs::read(&local)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<TapeLabel>(&bytes).ok());
        if let Err(e) = tokio::fs::remove_file(&local).await {
            debug!("Cannot remove label file {:?}: {}", local, e);
        }

        if found.as_ref() == Some(expected) {
            debug!("Cartridge {} label verified", code);
            return Ok(());
        }

        warn!(
            "Cartridge {} label mismatch: expected {}, found {:?}",
            code,
            expected.id,
            found.as_ref().map(|l| (&l.code, &l.id))
        );
        self.catalog
            .update_with(code, |t| t.status = CartridgeStatus::InError)?;
        Err(TapeLibraryError::catalog_conflict(format!(
            "Cartridge {} in drive {} does not carry its catalogued label",
            code,
            self.drive.index()
        )))
    }

    /// Cartridge the write goes to, reserved for this drive when taken from a slot
    fn select_write_tape(&self, order: &WriteOrder) -> Result<String> {
        if let Some(code) = &order.tape_code {
            let tape = self.catalog.get_cartridge(code)?;
            if !tape.accepts_writes_for(&order.bucket) {
                return Err(TapeLibraryError::catalog(format!(
                    "Cartridge {} cannot take writes for bucket {}",
                    code, order.bucket
                )));
            }
            return Ok(tape.code);
        }

        if let Some(mounted) = self.mounted()? {
            if mounted.accepts_writes_for(&order.bucket) {
                return Ok(mounted.code);
            }
        }

        let constraints = CartridgeConstraints {
            bucket: Some(order.bucket.clone()),
            ..Default::default()
        };
        self.catalog
            .claim_available_cartridge(&self.library, &constraints, self.drive.index())?
            .map(|tape| tape.code)
            .ok_or_else(|| {
                TapeLibraryError::catalog(format!(
                    "No cartridge available in {} for bucket {}",
                    self.library, order.bucket
                ))
            })
    }

    fn record_write_failure(&self, code: &str) {
        let threshold = self.full_threshold_bytes;
        let result = self.catalog.update_with(code, |tape| {
            if tape.written_bytes >= threshold {
                warn!("Cartridge {} is full ({} bytes written)", code, tape.written_bytes);
                tape.full = true;
            } else {
                warn!("Cartridge {} marked in error", code);
                tape.status = CartridgeStatus::InError;
            }
        });
        if let Err(e) = result {
            warn!("Cannot update cartridge {}: {}", code, e);
        }
    }

    async fn write(&self, order: &WriteOrder, state: &WorkerState) -> Result<()> {
        check_relative_path("source path", &order.source_path)?;
        check_relative_path("object name", &order.object_name)?;

        let source = self.input_directory.join(&order.source_path);
        let size = tokio::fs::metadata(&source)
            .await
            .map_err(|e| {
                TapeLibraryError::parameter_validation(format!(
                    "Cannot read source {:?}: {}",
                    source, e
                ))
            })?
            .len();

        let code = self.select_write_tape(order)?;
        self.mount(&code, state).await?;
        let mut tape = self.catalog.get_cartridge(&code)?;
        if tape.needs_label() {
            tape = self.write_label(&tape).await?;
        }
        let position = tape.file_count;
        self.position(position).await?;

        let response = self
            .drive
            .read_write()
            .write_to_tape(&order.source_path, &order.object_name)
            .await;
        if !response.is_ok() {
            self.record_write_failure(&code);
            return Err(TapeLibraryError::tape_command(response.diagnostic()));
        }

        self.catalog.update_with(&code, |t| {
            t.file_count = position + 1;
            t.current_position = position + 1;
            t.written_bytes += size;
            t.bucket.get_or_insert_with(|| order.bucket.clone());
        })?;

        self.catalog.record_archive(&ArchiveLocation {
            library: self.library.clone(),
            object_name: order.object_name.clone(),
            tape_code: code,
            file_position: position,
            size,
            bucket: order.bucket.clone(),
            written_at: Utc::now(),
        })?;
        Ok(())
    }

    async fn read(&self, order: &ReadOrder, state: &WorkerState) -> Result<()> {
        let mut by_tape: Vec<(String, Vec<ArchiveLocation>)> = Vec::new();
        let mut missing = Vec::new();

        for object in &order.object_ids {
            check_relative_path("object name", object)?;
            match self.catalog.find_archive(&self.library, object)? {
                Some(location) => {
                    match by_tape.iter_mut().find(|(code, _)| *code == location.tape_code) {
                        Some((_, locations)) => locations.push(location),
                        None => by_tape.push((location.tape_code.clone(), vec![location])),
                    }
                }
                None => missing.push(object.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(TapeLibraryError::catalog(format!(
                "Objects not archived in {}: {}",
                self.library,
                missing.join(", ")
            )));
        }

        for (code, mut locations) in by_tape {
            self.mount(&code, state).await?;
            locations.sort_by_key(|l| l.file_position);

            for location in locations {
                self.position(location.file_position).await?;
                check(
                    self.drive.read_write().read_from_tape(&location.object_name).await,
                    TapeLibraryError::tape_command,
                )?;

                self.catalog.update_with(&code, |t| {
                    t.current_position = location.file_position + 1;
                })?;
            }
        }
        Ok(())
    }
}

/// Turn a KO response into an error carrying its diagnostic
fn check<T>(response: Response<T>, error: fn(String) -> TapeLibraryError) -> Result<()> {
    if response.is_ok() {
        Ok(())
    } else {
        Err(error(response.diagnostic()))
    }
}

#[async_trait]
impl OrderExecutor for DriveTask {
    async fn execute(&self, order: &ReadWriteOrder, state: &WorkerState) -> OrderResult {
        let result = match order {
            ReadWriteOrder::Write(write) => self.write(write, state).await,
            ReadWriteOrder::Read(read) => self.read(read, state).await,
        };

        match result {
            Ok(()) => OrderResult::ok(order.id()),
            Err(e) => OrderResult::ko(order.id(), e.to_string()),
        }
    }
}
