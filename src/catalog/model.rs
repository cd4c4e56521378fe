use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartridgeStatus {
    Available,
    Mounted,
    InError,
    Exported,
}

impl std::fmt::Display for CartridgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CartridgeStatus::Available => "AVAILABLE",
            CartridgeStatus::Mounted => "MOUNTED",
            CartridgeStatus::InError => "IN_ERROR",
            CartridgeStatus::Exported => "EXPORTED",
        };
        write!(f, "{}", text)
    }
}

/// Physical position of a cartridge inside its library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "index", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TapeLocation {
    Slot(u32),
    ImportExport(u32),
    Drive(u32),
    Outside,
}

impl TapeLocation {
    pub fn is_drive(&self) -> bool {
        matches!(self, TapeLocation::Drive(_))
    }

    /// Index of the slot (storage or import/export) the cartridge sits in
    pub fn slot_index(&self) -> Option<u32> {
        match self {
            TapeLocation::Slot(i) | TapeLocation::ImportExport(i) => Some(*i),
            _ => None,
        }
    }
}

impl std::fmt::Display for TapeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TapeLocation::Slot(i) => write!(f, "slot {}", i),
            TapeLocation::ImportExport(i) => write!(f, "mailbox {}", i),
            TapeLocation::Drive(i) => write!(f, "drive {}", i),
            TapeLocation::Outside => write!(f, "outside"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeCartridge {
    /// Barcode / volume tag
    pub code: String,
    pub library: String,
    pub cartridge_type: String,
    pub capacity_class: String,
    pub status: CartridgeStatus,
    pub current_location: TapeLocation,
    /// Slot the cartridge returns to when unloaded
    pub previous_location: Option<TapeLocation>,
    pub bucket: Option<String>,
    pub file_count: u32,
    pub current_position: u32,
    pub written_bytes: u64,
    pub full: bool,
    /// Label written as file 0 on first use
    #[serde(default)]
    pub label: Option<TapeLabel>,
    /// Drive that claimed the cartridge and is about to load it
    #[serde(default)]
    pub reserved_by: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TapeCartridge {
    pub fn new(code: &str, library: &str, location: TapeLocation) -> Self {
        let (cartridge_type, capacity_class) = media_from_volume_tag(code);
        let now = Utc::now();
        Self {
            code: code.to_string(),
            library: library.to_string(),
            cartridge_type: cartridge_type.to_string(),
            capacity_class: capacity_class.to_string(),
            status: if location.is_drive() {
                CartridgeStatus::Mounted
            } else {
                CartridgeStatus::Available
            },
            current_location: location,
            previous_location: None,
            bucket: None,
            file_count: 0,
            current_position: 0,
            written_bytes: 0,
            full: false,
            label: None,
            reserved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != CartridgeStatus::Exported
    }

    /// Blank cartridges get a label before their first data file
    pub fn needs_label(&self) -> bool {
        self.label.is_none() && self.file_count == 0
    }

    /// Can this cartridge accept a new file for `bucket`
    pub fn accepts_writes_for(&self, bucket: &str) -> bool {
        !self.full
            && self.status != CartridgeStatus::InError
            && self.status != CartridgeStatus::Exported
            && self.bucket.as_deref().map_or(true, |b| b == bucket)
    }
}

/// Identity record stored as the first file of a cartridge, read back after
/// every load to detect a wrong cartridge in the drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeLabel {
    pub id: String,
    pub code: String,
    pub library: String,
    pub cartridge_type: String,
    pub labelled_at: DateTime<Utc>,
}

impl TapeLabel {
    pub fn for_cartridge(tape: &TapeCartridge) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            code: tape.code.clone(),
            library: tape.library.clone(),
            cartridge_type: tape.cartridge_type.clone(),
            labelled_at: Utc::now(),
        }
    }
}

/// LTO barcodes end with the media generation (`L6`, `L7`, `M8`...)
pub fn media_from_volume_tag(code: &str) -> (&'static str, &'static str) {
    let suffix = code.get(code.len().saturating_sub(2)..).unwrap_or("");
    match suffix {
        "L3" => ("LTO-3", "400GB"),
        "L4" => ("LTO-4", "800GB"),
        "L5" => ("LTO-5", "1.5TB"),
        "L6" => ("LTO-6", "2.5TB"),
        "L7" => ("LTO-7", "6TB"),
        "M8" => ("LTO-M8", "9TB"),
        "L8" => ("LTO-8", "12TB"),
        "L9" => ("LTO-9", "18TB"),
        _ => ("UNKNOWN", "UNKNOWN"),
    }
}

/// Filters for picking a cartridge to write on
#[derive(Debug, Clone, Default)]
pub struct CartridgeConstraints {
    pub bucket: Option<String>,
    pub cartridge_type: Option<String>,
    pub exclude: Vec<String>,
}

/// Where an object was written: cartridge and file position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLocation {
    pub library: String,
    pub object_name: String,
    pub tape_code: String,
    pub file_position: u32,
    pub size: u64,
    pub bucket: String,
    pub written_at: DateTime<Utc>,
}

/// Result of reconciling the catalog with an exchanger scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryReport {
    pub added: Vec<String>,
    pub relocated: Vec<String>,
    pub missing: Vec<String>,
    pub unchanged: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_from_volume_tag() {
        assert_eq!(media_from_volume_tag("VTL001L6"), ("LTO-6", "2.5TB"));
        assert_eq!(media_from_volume_tag("ABC123M8"), ("LTO-M8", "9TB"));
        assert_eq!(media_from_volume_tag("X"), ("UNKNOWN", "UNKNOWN"));
    }

    #[test]
    fn test_new_cartridge_status_follows_location() {
        assert_eq!(
            TapeCartridge::new("T1L6", "lib", TapeLocation::Slot(3)).status,
            CartridgeStatus::Available
        );
        assert_eq!(
            TapeCartridge::new("T1L6", "lib", TapeLocation::Drive(0)).status,
            CartridgeStatus::Mounted
        );
    }

    #[test]
    fn test_location_serialization() {
        let json = serde_json::to_value(TapeLocation::Drive(2)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "DRIVE", "index": 2}));
        let back: TapeLocation = serde_json::from_value(json).unwrap();
        assert_eq!(back, TapeLocation::Drive(2));
    }

    #[test]
    fn test_older_records_load_without_label() {
        let tape = TapeCartridge::new("T1L6", "lib", TapeLocation::Slot(1));
        let mut value = serde_json::to_value(&tape).unwrap();
        let fields = value.as_object_mut().unwrap();
        fields.remove("label");
        fields.remove("reserved_by");

        let back: TapeCartridge = serde_json::from_value(value).unwrap();
        assert_eq!(back, tape);
        assert!(back.needs_label());
    }

    #[test]
    fn test_accepts_writes_for() {
        let mut tape = TapeCartridge::new("T1L6", "lib", TapeLocation::Slot(1));
        assert!(tape.accepts_writes_for("objects"));

        tape.bucket = Some("logbook".to_string());
        assert!(!tape.accepts_writes_for("objects"));
        assert!(tape.accepts_writes_for("logbook"));

        tape.full = true;
        assert!(!tape.accepts_writes_for("logbook"));
    }
}
