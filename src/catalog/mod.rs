//! Tape Catalog
//!
//! Durable record of every cartridge (location, status, write counters) and of
//! where each archived object lives on tape. The catalog, not the store,
//! guarantees that two live cartridges never claim the same slot or drive.

pub mod model;

pub use self::model::{
    ArchiveLocation, CartridgeConstraints, CartridgeStatus, InventoryReport, TapeCartridge,
    TapeLabel, TapeLocation,
};

use crate::error::{Result, TapeLibraryError};
use crate::robot::LibrarySpec;
use crate::store::KeyValueStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const TAPE_PREFIX: &str = "tape/";
const ARCHIVE_PREFIX: &str = "archive/";

pub struct TapeCatalogService {
    store: Arc<dyn KeyValueStore>,
    /// Serialises check-and-put so conflict detection sees a stable view
    update_lock: Mutex<()>,
}

impl TapeCatalogService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            update_lock: Mutex::new(()),
        }
    }

    fn tape_key(code: &str) -> String {
        format!("{}{}", TAPE_PREFIX, code)
    }

    fn archive_key(library: &str, object_name: &str) -> String {
        format!("{}{}/{}", ARCHIVE_PREFIX, library, object_name)
    }

    pub fn find_cartridge(&self, code: &str) -> Result<Option<TapeCartridge>> {
        match self.store.get(&Self::tape_key(code))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn get_cartridge(&self, code: &str) -> Result<TapeCartridge> {
        self.find_cartridge(code)?
            .ok_or_else(|| TapeLibraryError::catalog(format!("Unknown cartridge {}", code)))
    }

    /// Every cartridge, optionally restricted to one library, ordered by code
    pub fn list(&self, library: Option<&str>) -> Result<Vec<TapeCartridge>> {
        let mut tapes = Vec::new();
        for (_, value) in self.store.scan(TAPE_PREFIX)? {
            let tape: TapeCartridge = serde_json::from_value(value)?;
            if library.map_or(true, |l| tape.library == l) {
                tapes.push(tape);
            }
        }
        Ok(tapes)
    }

    fn check_location_free(&self, tape: &TapeCartridge) -> Result<()> {
        if !tape.is_live() || tape.current_location == TapeLocation::Outside {
            return Ok(());
        }

        let holder = self.list(Some(&tape.library))?.into_iter().find(|other| {
            other.code != tape.code
                && other.is_live()
                && other.current_location == tape.current_location
        });

        match holder {
            Some(other) => Err(TapeLibraryError::catalog_conflict(format!(
                "{} of library {} is already held by cartridge {}, cannot assign it to {}",
                tape.current_location, tape.library, other.code, tape.code
            ))),
            None => Ok(()),
        }
    }

    fn put(&self, tape: &TapeCartridge) -> Result<()> {
        self.store
            .put(&Self::tape_key(&tape.code), serde_json::to_value(tape)?)
    }

    pub fn add_cartridge(&self, tape: TapeCartridge) -> Result<()> {
        let _guard = self.update_lock.lock();
        if self.find_cartridge(&tape.code)?.is_some() {
            return Err(TapeLibraryError::catalog(format!(
                "Cartridge {} is already catalogued",
                tape.code
            )));
        }
        self.check_location_free(&tape)?;
        info!("Cataloguing cartridge {} at {}", tape.code, tape.current_location);
        self.put(&tape)
    }

    /// Persist a modified cartridge, rejecting double assignment of its location
    pub fn update_cartridge(&self, tape: &TapeCartridge) -> Result<()> {
        let _guard = self.update_lock.lock();
        self.check_location_free(tape)?;
        let mut tape = tape.clone();
        tape.updated_at = Utc::now();
        debug!(
            "Updating cartridge {}: {} at {}",
            tape.code, tape.status, tape.current_location
        );
        self.put(&tape)
    }

    /// Apply `change` to the stored cartridge under the update lock
    pub fn update_with<F>(&self, code: &str, change: F) -> Result<TapeCartridge>
    where
        F: FnOnce(&mut TapeCartridge),
    {
        let _guard = self.update_lock.lock();
        let mut tape = self.get_cartridge(code)?;
        change(&mut tape);
        tape.updated_at = Utc::now();
        self.check_location_free(&tape)?;
        self.put(&tape)?;
        Ok(tape)
    }

    /// Move a cartridge and set its status. Loading into a drive remembers the
    /// slot it came from and consumes the drive's reservation.
    pub fn update_location(
        &self,
        code: &str,
        location: TapeLocation,
        status: CartridgeStatus,
    ) -> Result<TapeCartridge> {
        let _guard = self.update_lock.lock();
        let mut tape = self.get_cartridge(code)?;

        if let TapeLocation::Drive(target) = location {
            if tape.current_location.is_drive() && tape.current_location != location {
                return Err(TapeLibraryError::catalog_conflict(format!(
                    "Cartridge {} is still in {}, it must return to a slot before {}",
                    code, tape.current_location, location
                )));
            }
            if let Some(owner) = tape.reserved_by.filter(|owner| *owner != target) {
                return Err(TapeLibraryError::catalog_conflict(format!(
                    "Cartridge {} is reserved by drive {}, cannot load it into {}",
                    code, owner, location
                )));
            }
            tape.reserved_by = None;
        }

        if location.is_drive() && tape.current_location.slot_index().is_some() {
            tape.previous_location = Some(tape.current_location);
        }
        tape.current_location = location;
        tape.status = status;
        tape.updated_at = Utc::now();

        self.check_location_free(&tape)?;
        info!("Cartridge {} now {} at {}", tape.code, tape.status, location);
        self.put(&tape)?;
        Ok(tape)
    }

    /// Cartridge physically at `location`, if any
    pub fn find_by_location(
        &self,
        library: &str,
        location: TapeLocation,
    ) -> Result<Option<TapeCartridge>> {
        Ok(self
            .list(Some(library))?
            .into_iter()
            .find(|t| t.is_live() && t.current_location == location))
    }

    /// Pick a cartridge sitting in a storage slot that can take writes.
    /// Cartridges already opened for the bucket are preferred over blank ones.
    pub fn find_available_cartridge(
        &self,
        library: &str,
        constraints: &CartridgeConstraints,
    ) -> Result<Option<TapeCartridge>> {
        let candidates: Vec<TapeCartridge> = self
            .list(Some(library))?
            .into_iter()
            .filter(|t| t.status == CartridgeStatus::Available)
            .filter(|t| t.reserved_by.is_none())
            .filter(|t| matches!(t.current_location, TapeLocation::Slot(_)))
            .filter(|t| !t.full)
            .filter(|t| !constraints.exclude.contains(&t.code))
            .filter(|t| {
                constraints
                    .cartridge_type
                    .as_ref()
                    .map_or(true, |ty| &t.cartridge_type == ty)
            })
            .filter(|t| match (&constraints.bucket, &t.bucket) {
                (Some(wanted), Some(owner)) => wanted == owner,
                _ => true,
            })
            .collect();

        let opened = candidates
            .iter()
            .find(|t| t.bucket.is_some() && t.bucket == constraints.bucket);
        Ok(opened
            .or_else(|| candidates.iter().find(|t| t.bucket.is_none()))
            .or_else(|| candidates.first())
            .cloned())
    }

    /// Pick an available cartridge like [`Self::find_available_cartridge`] and
    /// reserve it for `drive` in the same critical section.
    pub fn claim_available_cartridge(
        &self,
        library: &str,
        constraints: &CartridgeConstraints,
        drive: u32,
    ) -> Result<Option<TapeCartridge>> {
        let _guard = self.update_lock.lock();
        let Some(mut tape) = self.find_available_cartridge(library, constraints)? else {
            return Ok(None);
        };

        tape.reserved_by = Some(drive);
        tape.updated_at = Utc::now();
        self.put(&tape)?;
        info!("Cartridge {} reserved by drive {}", tape.code, drive);
        Ok(Some(tape))
    }

    /// Reserve a cartridge sitting in a slot so that only `drive` loads it
    pub fn reserve_cartridge(&self, code: &str, drive: u32) -> Result<TapeCartridge> {
        let _guard = self.update_lock.lock();
        let mut tape = self.get_cartridge(code)?;

        if let Some(owner) = tape.reserved_by.filter(|owner| *owner != drive) {
            return Err(TapeLibraryError::catalog_conflict(format!(
                "Cartridge {} is already reserved by drive {}",
                code, owner
            )));
        }
        if !tape.is_live() || tape.current_location.slot_index().is_none() {
            return Err(TapeLibraryError::catalog_conflict(format!(
                "Cartridge {} is {} at {}, not loadable",
                code, tape.status, tape.current_location
            )));
        }

        if tape.reserved_by.is_none() {
            tape.reserved_by = Some(drive);
            tape.updated_at = Utc::now();
            self.put(&tape)?;
            debug!("Cartridge {} reserved by drive {}", code, drive);
        }
        Ok(tape)
    }

    /// Drop the reservation `drive` holds on a cartridge, if any
    pub fn release_cartridge(&self, code: &str, drive: u32) -> Result<()> {
        let _guard = self.update_lock.lock();
        let mut tape = self.get_cartridge(code)?;
        if tape.reserved_by != Some(drive) {
            return Ok(());
        }

        tape.reserved_by = None;
        tape.updated_at = Utc::now();
        debug!("Cartridge {} released by drive {}", code, drive);
        self.put(&tape)
    }

    pub fn record_archive(&self, location: &ArchiveLocation) -> Result<()> {
        debug!(
            "Object {} stored on {} at file {}",
            location.object_name, location.tape_code, location.file_position
        );
        self.store.put(
            &Self::archive_key(&location.library, &location.object_name),
            serde_json::to_value(location)?,
        )
    }

    pub fn find_archive(
        &self,
        library: &str,
        object_name: &str,
    ) -> Result<Option<ArchiveLocation>> {
        match self.store.get(&Self::archive_key(library, object_name))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Reconcile the catalog with what the exchanger reports
    pub fn inventory(&self, library: &str, spec: &LibrarySpec) -> Result<InventoryReport> {
        let _guard = self.update_lock.lock();
        let mut report = InventoryReport::default();

        let mut seen: BTreeMap<String, (TapeLocation, Option<TapeLocation>)> = BTreeMap::new();
        for slot in &spec.slots {
            if let Some(tag) = &slot.volume_tag {
                let location = if slot.import_export {
                    TapeLocation::ImportExport(slot.index)
                } else {
                    TapeLocation::Slot(slot.index)
                };
                seen.insert(tag.clone(), (location, None));
            }
        }
        for drive in &spec.drives {
            if let Some(tag) = &drive.volume_tag {
                let home = drive.source_slot.map(TapeLocation::Slot);
                seen.insert(tag.clone(), (TapeLocation::Drive(drive.index), home));
            }
        }

        let known: Vec<TapeCartridge> = self.list(Some(library))?;
        let known_codes: HashSet<&str> = known.iter().map(|t| t.code.as_str()).collect();

        for tape in &known {
            if !tape.is_live() {
                continue;
            }
            match seen.get(&tape.code) {
                Some((location, home)) if *location == tape.current_location => {
                    if home.is_some() && tape.previous_location.is_none() {
                        let mut tape = tape.clone();
                        tape.previous_location = *home;
                        self.put(&tape)?;
                    }
                    report.unchanged += 1;
                }
                Some((location, home)) => {
                    let mut tape = tape.clone();
                    warn!(
                        "Cartridge {} found at {} but catalogued at {}",
                        tape.code, location, tape.current_location
                    );
                    tape.current_location = *location;
                    if location.is_drive() {
                        tape.status = CartridgeStatus::Mounted;
                        tape.previous_location = home.or(tape.previous_location);
                    } else if tape.status == CartridgeStatus::Mounted {
                        tape.status = CartridgeStatus::Available;
                    }
                    tape.updated_at = Utc::now();
                    self.put(&tape)?;
                    report.relocated.push(tape.code.clone());
                }
                None if tape.current_location != TapeLocation::Outside => {
                    warn!("Cartridge {} is no longer visible in library {}", tape.code, library);
                    let mut tape = tape.clone();
                    tape.current_location = TapeLocation::Outside;
                    tape.updated_at = Utc::now();
                    self.put(&tape)?;
                    report.missing.push(tape.code.clone());
                }
                None => report.unchanged += 1,
            }
        }

        for (code, (location, home)) in &seen {
            if known_codes.contains(code.as_str()) {
                continue;
            }
            if let Some(other) = self.find_cartridge(code)? {
                warn!(
                    "Cartridge {} seen in {} but catalogued in library {}, skipped",
                    code, library, other.library
                );
                continue;
            }
            let mut tape = TapeCartridge::new(code, library, *location);
            tape.previous_location = *home;
            self.put(&tape)?;
            report.added.push(code.clone());
        }

        info!(
            "Inventory of {}: {} added, {} relocated, {} missing, {} unchanged",
            library,
            report.added.len(),
            report.relocated.len(),
            report.missing.len(),
            report.unchanged
        );
        Ok(report)
    }
}
