use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Read,
    Write,
}

impl OrderType {
    pub fn other(self) -> Self {
        match self {
            OrderType::Read => OrderType::Write,
            OrderType::Write => OrderType::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Read => "read",
            OrderType::Write => "write",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InProgress,
    Ok,
    Ko,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Ok | OrderStatus::Ko)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Ok => "OK",
            OrderStatus::Ko => "KO",
        };
        write!(f, "{}", text)
    }
}

/// Copy one file from the input directory onto a cartridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOrder {
    pub id: Uuid,
    pub library: String,
    pub bucket: String,
    /// Path relative to the input directory
    pub source_path: String,
    pub object_name: String,
    /// Cartridge to write on; any available one when absent
    #[serde(default)]
    pub tape_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl WriteOrder {
    pub fn new(library: &str, bucket: &str, source_path: &str, object_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            library: library.to_string(),
            bucket: bucket.to_string(),
            source_path: source_path.to_string(),
            object_name: object_name.to_string(),
            tape_code: None,
            created_at: Utc::now(),
            status: OrderStatus::Pending,
        }
    }

    pub fn on_tape(mut self, tape_code: &str) -> Self {
        self.tape_code = Some(tape_code.to_string());
        self
    }
}

/// Restore archived objects into the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOrder {
    pub id: Uuid,
    pub library: String,
    pub bucket: String,
    pub object_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl ReadOrder {
    pub fn new(library: &str, bucket: &str, object_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            library: library.to_string(),
            bucket: bucket.to_string(),
            object_ids,
            created_at: Utc::now(),
            status: OrderStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ReadWriteOrder {
    Write(WriteOrder),
    Read(ReadOrder),
}

impl ReadWriteOrder {
    pub fn is_write_order(&self) -> bool {
        matches!(self, ReadWriteOrder::Write(_))
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            ReadWriteOrder::Write(_) => OrderType::Write,
            ReadWriteOrder::Read(_) => OrderType::Read,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            ReadWriteOrder::Write(o) => o.id,
            ReadWriteOrder::Read(o) => o.id,
        }
    }

    pub fn library(&self) -> &str {
        match self {
            ReadWriteOrder::Write(o) => &o.library,
            ReadWriteOrder::Read(o) => &o.library,
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            ReadWriteOrder::Write(o) => &o.bucket,
            ReadWriteOrder::Read(o) => &o.bucket,
        }
    }

    pub fn status(&self) -> OrderStatus {
        match self {
            ReadWriteOrder::Write(o) => o.status,
            ReadWriteOrder::Read(o) => o.status,
        }
    }

    pub fn set_status(&mut self, status: OrderStatus) {
        match self {
            ReadWriteOrder::Write(o) => o.status = status,
            ReadWriteOrder::Read(o) => o.status = status,
        }
    }
}

impl From<WriteOrder> for ReadWriteOrder {
    fn from(order: WriteOrder) -> Self {
        ReadWriteOrder::Write(order)
    }
}

impl From<ReadOrder> for ReadWriteOrder {
    fn from(order: ReadOrder) -> Self {
        ReadWriteOrder::Read(order)
    }
}

/// Last known state of a claimed order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub order_id: Uuid,
    pub order_type: OrderType,
    pub library: String,
    pub status: OrderStatus,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}
