use std::path::{Component, Path};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TapeLibraryError>;

#[derive(Error, Debug)]
pub enum TapeLibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tape command error: {0}")]
    TapeCommand(String),

    #[error("Robot error: {0}")]
    Robot(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Catalog conflict: {0}")]
    CatalogConflict(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Parameter validation error: {0}")]
    ParameterValidation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl TapeLibraryError {
    pub fn tape_command<T: Into<String>>(msg: T) -> Self {
        Self::TapeCommand(msg.into())
    }

    pub fn robot<T: Into<String>>(msg: T) -> Self {
        Self::Robot(msg.into())
    }

    pub fn catalog<T: Into<String>>(msg: T) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn catalog_conflict<T: Into<String>>(msg: T) -> Self {
        Self::CatalogConflict(msg.into())
    }

    pub fn queue<T: Into<String>>(msg: T) -> Self {
        Self::Queue(msg.into())
    }

    pub fn store<T: Into<String>>(msg: T) -> Self {
        Self::Store(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }
}

/// Fail with a parameter validation error when a mandatory value is blank.
pub fn check_not_blank(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TapeLibraryError::parameter_validation(format!(
            "{} is mandatory and must not be empty",
            name
        )));
    }
    Ok(())
}

/// Fail when `value` is not a relative path staying below the directory it is
/// joined to (no root, no prefix, no `..`).
pub fn check_relative_path(name: &str, value: &str) -> Result<()> {
    check_not_blank(name, value)?;
    let escapes = Path::new(value)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TapeLibraryError::parameter_validation(format!(
            "{} {:?} must be a relative path without '..'",
            name, value
        )));
    }
    Ok(())
}
