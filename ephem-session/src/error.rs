//! Error types for ephem-session

use std::path::PathBuf;

use ephem_core::{TrainingPhase, TrialType};
use thiserror::Error;

/// Top-level error type for a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to persist session data: {0}")]
    Flush(#[from] LogError),

    #[error("Session already started (state: {0})")]
    AlreadyStarted(String),
}

/// Problems that must stop a session before its first trial
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings file not found: {0}")]
    SettingsNotFound(PathBuf),

    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings sheet is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("No settings row for subject '{0}'")]
    UnknownSubject(String),

    #[error("Invalid value '{value}' in column '{column}' for subject '{subject}'")]
    InvalidValue {
        subject: String,
        column: &'static str,
        value: String,
    },

    #[error("Unknown color '{0}'")]
    UnknownColor(String),

    #[error("Subject identifier must not be empty")]
    EmptySubject,

    #[error("Trial plan error: {0}")]
    Plan(#[from] PlanError),
}

/// Sequencing violations detected while building a trial plan
#[derive(Error, Debug, PartialEq)]
pub enum PlanError {
    #[error("{phase:?} plan has {actual} trials, expected {expected}")]
    LengthMismatch {
        phase: TrainingPhase,
        expected: usize,
        actual: usize,
    },

    #[error("Block {block} holds {actual} x {trial_type:?}, expected {expected}")]
    CompositionMismatch {
        block: usize,
        trial_type: TrialType,
        expected: usize,
        actual: usize,
    },

    #[error("No ordering of block {block} avoids {limit} repeats of the same trial type")]
    Unsatisfiable { block: usize, limit: usize },
}

/// Failures while writing the event log to durable storage
#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize session summary: {0}")]
    Summary(#[from] serde_json::Error),
}

/// Errors reported by the reward device driver
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Reward device unavailable: {0}")]
    Unavailable(String),

    #[error("Reward device command failed: {0}")]
    CommandFailed(String),
}
