use std::path::PathBuf;

use thiserror::Error;

use crate::modbus::packet::ExceptionCode;

/// Failures of a single device read attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Socket could not be opened, or broke while talking to the device.
    #[error("connection failure: {0}")]
    Connection(String),

    /// The device answered with a Modbus exception response.
    #[error("device returned exception {code:#04x} ({}) for function {function:#04x}", ExceptionCode::describe(*.code))]
    Protocol { function: u8, code: u8 },

    #[error("insufficient registers: expected {expected}, got {got}")]
    InsufficientData { expected: usize, got: usize },

    /// Descriptor and words do not fit together. Valid descriptors never hit this.
    #[error("cannot decode register value: {0}")]
    Decode(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Outcome of a full read-and-decode of one register descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadFailure {
    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: DeviceError },

    #[error(transparent)]
    Decode(DeviceError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed row {line} in {}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        reason: String,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
