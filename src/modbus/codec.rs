//! Register word decoding.
//!
//! Pure functions turning the words of one read into a typed value. The read
//! layer guarantees the word count, so a short buffer here is a caller bug
//! reported as `InsufficientData` rather than a panic.

use crate::prelude::*;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

pub fn decode(words: &[u16], kind: RegisterKind, gain: f64) -> Result<Value, DeviceError> {
    if words.len() < kind.min_words() {
        return Err(DeviceError::InsufficientData {
            expected: kind.min_words(),
            got: words.len(),
        });
    }

    match kind {
        RegisterKind::U16 => Ok(Value::Integer(words[0] as i64)),
        RegisterKind::I16 => scaled(words[0] as i16 as i64, gain),
        RegisterKind::U32 => scaled(combine(words[0], words[1]) as i64, gain),
        RegisterKind::I32 => scaled(combine(words[0], words[1]) as i32 as i64, gain),
        RegisterKind::String => Ok(Value::Text(text(words))),
    }
}

fn combine(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

fn scaled(raw: i64, gain: f64) -> Result<Value, DeviceError> {
    if gain.is_nan() || gain <= 0.0 {
        return Err(DeviceError::Decode(format!("gain must be positive, got {}", gain)));
    }

    if gain > 1.0 {
        Ok(Value::Real(raw as f64 / gain))
    } else {
        Ok(Value::Integer(raw))
    }
}

// high byte first, NULs dropped
fn text(words: &[u16]) -> String {
    words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|b| *b != 0)
        .map(char::from)
        .collect()
}

/// Inverse of `decode` for integer kinds, used by fakes and tests.
pub fn encode(raw: i64, kind: RegisterKind) -> Vec<u16> {
    match kind {
        RegisterKind::U16 | RegisterKind::I16 => vec![raw as u16],
        RegisterKind::U32 | RegisterKind::I32 => {
            let v = raw as u32;
            vec![(v >> 16) as u16, v as u16]
        }
        RegisterKind::String => Vec::new(),
    }
}
