use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A point in the installation plane, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Evaluated occupancy state of a single grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellState {
    /// Nobody nearby: the shower may run.
    #[default]
    Clear,
    /// Adjacent to an occupied cell.
    Yellow,
    /// Occupied.
    Green,
}

impl CellState {
    /// `true` for states that require the cell's shower to be off.
    pub fn is_occupied_or_warned(self) -> bool {
        matches!(self, CellState::Green | CellState::Yellow)
    }
}

/// Operator-facing fault notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "rainroom-runtime::control_loop"
    pub source: String,
    pub message: String,
}

impl Alert {
    /// Build an alert stamped with a fresh id and the current time.
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Error type spanning relay transport failures, sensor faults and
/// configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RainError {
    #[error("Relay transport timed out (unit {unit}, register {register})")]
    TransportTimeout { unit: u8, register: u16 },

    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Relay unit {unit} rejected the write with exception code {code:#04x}")]
    RelayException { unit: u8, code: u8 },

    #[error("Sensor protocol fault on {sensor}: {details}")]
    SensorProtocol { sensor: String, details: String },

    #[error("Sensor {sensor} unavailable: {details}")]
    SensorUnavailable { sensor: String, details: String },

    #[error("Grid dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Grid placement rejected: {0}")]
    Placement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl RainError {
    /// `true` when the error is a failed exchange with the relay network,
    /// which leaves actuator state unconfirmed.
    pub fn is_relay_fault(&self) -> bool {
        matches!(
            self,
            RainError::TransportTimeout { .. }
                | RainError::Transport(_)
                | RainError::RelayException { .. }
        )
    }
}
