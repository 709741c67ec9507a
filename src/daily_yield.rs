use crate::prelude::*;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Last known cumulative production for a day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyYield {
    pub date: NaiveDate,
    pub energy_kwh: f64,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

impl DailyYield {
    pub fn new(energy_kwh: f64, now: NaiveDateTime) -> Self {
        Self {
            date: now.date(),
            energy_kwh,
            timestamp: now,
        }
    }

    pub fn message(&self) -> String {
        daily_message(self.energy_kwh)
    }
}

pub fn daily_message(energy_kwh: f64) -> String {
    format!("Daily power: {:.2} kWh", energy_kwh)
}

mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// JSON snapshot file, overwritten wholesale on every save.
#[derive(Clone, Debug)]
pub struct DailyYieldFile {
    path: PathBuf,
}

impl DailyYieldFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable snapshot is simply absent.
    pub fn load(&self) -> Option<DailyYield> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("ignoring malformed {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, snapshot: &DailyYield) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, json)
            .map_err(|err| anyhow!("error writing {}: {}", self.path.display(), err))?;

        info!(
            "saved daily yield {:.2} kWh for {} to {}",
            snapshot.energy_kwh,
            snapshot.date,
            self.path.display()
        );
        Ok(())
    }
}
