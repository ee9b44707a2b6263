use std::path::PathBuf;

use thiserror::Error;

use crate::fan_curve::CurveError;

// Errors reported by a device I/O backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    // The I/O mechanism itself cannot run, nothing will recover this
    #[error("Device I/O unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Failed to read {quantity} of GPU {device}: {reason}")]
    Read {
        device: u32,
        quantity: &'static str,
        reason: String,
    },

    #[error("Failed to set fan control of GPU {device}: {reason}")]
    Actuation { device: u32, reason: String },
}

impl DeviceError {
    // Only an unavailable mechanism stops the daemon,
    // read and actuation failures are retried on the next cycle
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::Unavailable { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse Json configuration")]
    Parse(#[from] serde_json::Error),

    #[error("Fan curve of GPU {device} is invalid")]
    Curve {
        device: u32,
        #[source]
        source: CurveError,
    },

    #[error("Fan curve of GPU {device} has a negative temperature: {temp}")]
    NegativeTemperature { device: u32, temp: i32 },

    #[error("Fan curve of GPU {device} has a temperature above {max}: {temp}")]
    TemperatureTooHigh { device: u32, temp: i32, max: i32 },

    #[error("Polling interval of GPU {device} must be a positive number of seconds, got {interval}")]
    InvalidInterval { device: u32, interval: f64 },

    #[error("Invalid speed range for GPU {device}: {min}% - {max}%")]
    InvalidSpeedRange { device: u32, min: u8, max: u8 },

    #[error("I/O timeout must be positive, got {0}")]
    InvalidTimeout(f64),
}
