//! Error types for stentor.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StentorError {
    // Validation errors: bad arguments, missing inputs. No state changed.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("Invalid argument for {name}: {message}")]
    InvalidArgument { name: String, message: String },

    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: PathBuf },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Dependency errors: required external binary absent or not executable.
    #[error("Required tool not found or not executable: {tool}")]
    MissingDependency { tool: String },

    // Transient lock contention: a live peer holds the lock.
    #[error("Lock '{name}' is held by another process")]
    LockHeld { name: String },

    // Transport loss: the remote filesystem died mid-operation.
    #[error("Remote transport lost: {message}")]
    TransportLost { message: String },

    // Audio processing errors (normalization, probing, extraction).
    #[error("Audio processing failed: {message}")]
    Audio { message: String },

    // Transcription errors: a segment exhausted every configured model.
    #[error("Transcription failed for segment {segment}: {message}")]
    Transcription { segment: u32, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StentorError>;

impl StentorError {
    /// Process exit code for this error, per the documented contract:
    /// 1 = processing failure, 2 = validation/dependency failure,
    /// 10 = retryable lock contention, 20 = transport lost.
    pub fn exit_code(&self) -> i32 {
        use crate::defaults;
        match self {
            StentorError::InputNotFound { .. }
            | StentorError::InvalidArgument { .. }
            | StentorError::ConfigFileNotFound { .. }
            | StentorError::ConfigInvalidValue { .. }
            | StentorError::MissingDependency { .. } => defaults::EXIT_VALIDATION,
            StentorError::LockHeld { .. } => defaults::EXIT_RETRYABLE,
            StentorError::TransportLost { .. } => defaults::EXIT_TRANSPORT_LOST,
            _ => defaults::EXIT_FAILURE,
        }
    }
}
