//! Error types for the roundhouse service
//!
//! Domain errors (fairness, ledger, orchestrator, collaborators) live next to the
//! code that raises them and are built with `thiserror`. This module holds the
//! root error used by the binaries and the wiring code, with one category per
//! subsystem.

use std::fmt;

use crate::fairness::FairnessError;
use crate::games::orchestrator::RoundError;

/// Root error type for all roundhouse operations
#[derive(Debug)]
pub enum RoundhouseError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Round store errors
    Storage(StorageError),

    /// Seed commitment and verification errors
    Fairness(FairnessError),

    /// Round lifecycle errors
    Round(RoundError),

    /// HTTP / WebSocket surface errors
    Transport(TransportError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Round store errors
#[derive(Debug)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
}

/// Listener and server errors
#[derive(Debug)]
pub enum TransportError {
    BindFailed(String),
    InvalidAddress(String),
    ServerFailed(String),
}

impl fmt::Display for RoundhouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundhouseError::Configuration(e) => write!(f, "Configuration error: {}", e),
            RoundhouseError::Storage(e) => write!(f, "Storage error: {}", e),
            RoundhouseError::Fairness(e) => write!(f, "Fairness error: {}", e),
            RoundhouseError::Round(e) => write!(f, "Round error: {}", e),
            RoundhouseError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            TransportError::InvalidAddress(addr) => write!(f, "Invalid listen address: {}", addr),
            TransportError::ServerFailed(msg) => write!(f, "Server failed: {}", msg),
        }
    }
}

impl std::error::Error for RoundhouseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RoundhouseError::Configuration(e) => Some(e),
            RoundhouseError::Storage(e) => Some(e),
            RoundhouseError::Fairness(e) => Some(e),
            RoundhouseError::Round(e) => Some(e),
            RoundhouseError::Transport(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}
impl std::error::Error for TransportError {}

impl From<ConfigurationError> for RoundhouseError {
    fn from(e: ConfigurationError) -> Self {
        RoundhouseError::Configuration(e)
    }
}

impl From<StorageError> for RoundhouseError {
    fn from(e: StorageError) -> Self {
        RoundhouseError::Storage(e)
    }
}

impl From<FairnessError> for RoundhouseError {
    fn from(e: FairnessError) -> Self {
        RoundhouseError::Fairness(e)
    }
}

impl From<RoundError> for RoundhouseError {
    fn from(e: RoundError) -> Self {
        RoundhouseError::Round(e)
    }
}

impl From<TransportError> for RoundhouseError {
    fn from(e: TransportError) -> Self {
        RoundhouseError::Transport(e)
    }
}

// External error conversions
impl From<rocksdb::Error> for RoundhouseError {
    fn from(e: rocksdb::Error) -> Self {
        RoundhouseError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for RoundhouseError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::AddrNotAvailable => {
                RoundhouseError::Transport(TransportError::BindFailed(e.to_string()))
            }
            _ => RoundhouseError::Transport(TransportError::ServerFailed(e.to_string())),
        }
    }
}

impl From<toml::de::Error> for RoundhouseError {
    fn from(e: toml::de::Error) -> Self {
        RoundhouseError::Configuration(ConfigurationError::LoadFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type RoundhouseResult<T> = Result<T, RoundhouseError>;
