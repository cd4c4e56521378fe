//! Parser for the exchanger `status` report
//!
//! ```text
//!   Storage Changer /dev/sg1:2 Drives, 4 Slots ( 1 Import/Export )
//! Data Transfer Element 0:Full (Storage Element 1 Loaded):VolumeTag = TAPE01L6
//! Data Transfer Element 1:Empty
//!       Storage Element 1:Empty
//!       Storage Element 2:Full :VolumeTag=TAPE02L6
//!       Storage Element 4 IMPORT/EXPORT:Empty
//! ```

use crate::error::{Result, TapeLibraryError};
use serde::{Deserialize, Serialize};

/// Occupancy of one drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveSlotSpec {
    pub index: u32,
    pub full: bool,
    pub volume_tag: Option<String>,
    /// Storage slot the loaded cartridge came from, when the changer knows it
    pub source_slot: Option<u32>,
}

/// Occupancy of one storage or import/export slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlotSpec {
    pub index: u32,
    pub import_export: bool,
    pub full: bool,
    pub volume_tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySpec {
    pub device: String,
    pub drive_count: u32,
    pub slot_count: u32,
    pub mailbox_count: u32,
    pub drives: Vec<DriveSlotSpec>,
    pub slots: Vec<StorageSlotSpec>,
}

impl LibrarySpec {
    pub fn parse(text: &str) -> Result<Self> {
        let mut spec = LibrarySpec::default();
        let mut header_seen = false;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("Storage Changer") {
                parse_header(rest, &mut spec)?;
                header_seen = true;
            } else if let Some(rest) = line.strip_prefix("Data Transfer Element") {
                spec.drives.push(parse_drive(rest)?);
            } else if let Some(rest) = line.strip_prefix("Storage Element") {
                spec.slots.push(parse_slot(rest)?);
            }
        }

        if !header_seen {
            return Err(TapeLibraryError::parse(
                "exchanger status has no 'Storage Changer' header",
            ));
        }
        Ok(spec)
    }

    pub fn drive(&self, index: u32) -> Option<&DriveSlotSpec> {
        self.drives.iter().find(|d| d.index == index)
    }

    pub fn slot(&self, index: u32) -> Option<&StorageSlotSpec> {
        self.slots.iter().find(|s| s.index == index)
    }

    pub fn empty_slots(&self) -> impl Iterator<Item = &StorageSlotSpec> {
        self.slots.iter().filter(|s| !s.full && !s.import_export)
    }
}

// " /dev/sg1:2 Drives, 4 Slots ( 1 Import/Export )"
fn parse_header(rest: &str, spec: &mut LibrarySpec) -> Result<()> {
    let (device, counts) = rest
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| TapeLibraryError::parse(format!("bad changer header: {}", rest)))?;
    spec.device = device.trim().to_string();

    let tokens: Vec<&str> = counts
        .split(|c: char| c == ',' || c == '(' || c == ')')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    for token in tokens {
        let mut words = token.split_whitespace();
        let (Some(count), Some(kind)) = (words.next(), words.next()) else {
            continue;
        };
        let count: u32 = count.parse().map_err(|_| {
            TapeLibraryError::parse(format!("bad count in changer header: {}", token))
        })?;
        match kind {
            "Drives" | "Drive" => spec.drive_count = count,
            "Slots" | "Slot" => spec.slot_count = count,
            "Import/Export" => spec.mailbox_count = count,
            _ => {}
        }
    }
    Ok(())
}

// " 0:Full (Storage Element 1 Loaded):VolumeTag = TAPE01L6"
fn parse_drive(rest: &str) -> Result<DriveSlotSpec> {
    let (index, state) = split_index(rest)?;
    let full = state.starts_with("Full");

    let source_slot = state
        .split_once("(Storage Element")
        .and_then(|(_, tail)| tail.split_whitespace().next())
        .and_then(|n| n.parse().ok());

    Ok(DriveSlotSpec {
        index,
        full,
        volume_tag: if full { volume_tag(state) } else { None },
        source_slot,
    })
}

// " 2:Full :VolumeTag=TAPE02L6" or " 4 IMPORT/EXPORT:Empty"
fn parse_slot(rest: &str) -> Result<StorageSlotSpec> {
    let import_export = rest.contains("IMPORT/EXPORT");
    let cleaned = rest.replace("IMPORT/EXPORT", "");
    let (index, state) = split_index(&cleaned)?;
    let full = state.starts_with("Full");

    Ok(StorageSlotSpec {
        index,
        import_export,
        full,
        volume_tag: if full { volume_tag(state) } else { None },
    })
}

fn split_index(rest: &str) -> Result<(u32, &str)> {
    let (index, state) = rest
        .split_once(':')
        .ok_or_else(|| TapeLibraryError::parse(format!("bad element line: {}", rest)))?;
    let index = index
        .trim()
        .parse()
        .map_err(|_| TapeLibraryError::parse(format!("bad element index: {}", rest)))?;
    Ok((index, state.trim()))
}

fn volume_tag(state: &str) -> Option<String> {
    let (_, tail) = state.split_once("VolumeTag")?;
    let tag = tail.trim_start().strip_prefix('=')?.split_whitespace().next()?;
    Some(tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "  Storage Changer /dev/sg1:2 Drives, 5 Slots ( 1 Import/Export )
Data Transfer Element 0:Full (Storage Element 1 Loaded):VolumeTag = TAPE01L6
Data Transfer Element 1:Empty
      Storage Element 1:Empty
      Storage Element 2:Full :VolumeTag=TAPE02L6
      Storage Element 3:Full :VolumeTag=TAPE03L6
      Storage Element 4:Empty
      Storage Element 5 IMPORT/EXPORT:Full :VolumeTag=TAPE05L6
";

    #[test]
    fn test_parse_header() {
        let spec = LibrarySpec::parse(STATUS).unwrap();
        assert_eq!(spec.device, "/dev/sg1");
        assert_eq!(spec.drive_count, 2);
        assert_eq!(spec.slot_count, 5);
        assert_eq!(spec.mailbox_count, 1);
    }

    #[test]
    fn test_parse_drives() {
        let spec = LibrarySpec::parse(STATUS).unwrap();
        assert_eq!(spec.drives.len(), 2);

        let loaded = spec.drive(0).unwrap();
        assert!(loaded.full);
        assert_eq!(loaded.volume_tag.as_deref(), Some("TAPE01L6"));
        assert_eq!(loaded.source_slot, Some(1));

        let empty = spec.drive(1).unwrap();
        assert!(!empty.full);
        assert_eq!(empty.volume_tag, None);
    }

    #[test]
    fn test_parse_slots() {
        let spec = LibrarySpec::parse(STATUS).unwrap();
        assert_eq!(spec.slots.len(), 5);
        assert_eq!(spec.slot(2).unwrap().volume_tag.as_deref(), Some("TAPE02L6"));
        assert_eq!(spec.slot(3).unwrap().volume_tag.as_deref(), Some("TAPE03L6"));

        let mailbox = spec.slot(5).unwrap();
        assert!(mailbox.import_export);
        assert_eq!(mailbox.volume_tag.as_deref(), Some("TAPE05L6"));

        let empty: Vec<u32> = spec.empty_slots().map(|s| s.index).collect();
        assert_eq!(empty, vec![1, 4]);
    }

    #[test]
    fn test_missing_header() {
        assert!(LibrarySpec::parse("Data Transfer Element 0:Empty").is_err());
    }
}
