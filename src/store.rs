use crate::prelude::*;
use chrono::{Duration, NaiveDateTime, Timelike};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H:%M";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Sample {
    /// Seconds are dropped; the store has minute resolution.
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        let timestamp = timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(timestamp);
        Self { timestamp, value }
    }
}

/// Append-only CSV of `timestamp,value` rows for one series.
///
/// Clones share the same lock, so appends and trims through any clone never
/// interleave.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    name: String,
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl TimeSeriesStore {
    pub fn new(name: &str, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.to_string(),
            path: path.as_ref().to_path_buf(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, sample: Sample) -> Result<(), StoreError> {
        let _guard = self.guard();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(&self.path, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record([
                sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                sample.value.to_string(),
            ])
            .map_err(|e| StoreError::io(&self.path, e.into()))?;
        writer.flush().map_err(|e| StoreError::io(&self.path, e))?;

        trace!("{}: appended {} at {}", self.name, sample.value, sample.timestamp);
        Ok(())
    }

    /// All parseable rows in file order. A missing file is an empty series.
    pub fn read_all(&self) -> Result<Vec<Sample>, StoreError> {
        let _guard = self.guard();
        self.read_unlocked()
    }

    pub fn values(&self) -> Result<Vec<f64>, StoreError> {
        Ok(self.read_all()?.into_iter().map(|s| s.value).collect())
    }

    /// Drops rows older than `retention` before `now` and returns how many went.
    pub fn trim(&self, now: NaiveDateTime, retention: Duration) -> Result<usize, StoreError> {
        let _guard = self.guard();

        if !self.path.exists() {
            return Ok(0);
        }

        let samples = self.read_unlocked()?;
        let total = self.row_count()?;
        let cutoff = now - retention;
        let kept: Vec<&Sample> = samples.iter().filter(|s| s.timestamp >= cutoff).collect();

        self.rewrite(&kept)?;

        let removed = total - kept.len();
        info!("{}: trimmed {} rows older than {}", self.name, removed, cutoff);
        Ok(removed)
    }

    /// Replaces the file with `kept` through `<path>.tmp`; the temporary file
    /// never outlives a failed rewrite.
    fn rewrite(&self, kept: &[&Sample]) -> Result<(), StoreError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = write_rows(&tmp, kept)
            .and_then(|()| std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e)));

        if result.is_err() {
            if let Err(e) = std::fs::remove_file(&tmp) {
                debug!("{}: leftover {}: {}", self.name, tmp.display(), e);
            }
        }
        result
    }

    fn reader(&self) -> Result<Option<csv::Reader<std::fs::File>>, StoreError> {
        match std::fs::File::open(&self.path) {
            Ok(file) => Ok(Some(
                csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(file),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn read_unlocked(&self) -> Result<Vec<Sample>, StoreError> {
        let Some(mut reader) = self.reader()? else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(StoreError::io(&self.path, e.into())),
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or_default();
                    warn!("{}", self.parse_error(line, e.to_string()));
                    continue;
                }
            };

            let line = record.position().map(|p| p.line()).unwrap_or_default();
            match Self::parse_record(&record) {
                Ok(sample) => samples.push(sample),
                Err(reason) => warn!("{}", self.parse_error(line, reason)),
            }
        }

        Ok(samples)
    }

    fn row_count(&self) -> Result<usize, StoreError> {
        let Some(mut reader) = self.reader()? else {
            return Ok(0);
        };
        Ok(reader.records().count())
    }

    fn parse_error(&self, line: u64, reason: String) -> StoreError {
        StoreError::Parse {
            path: self.path.clone(),
            line,
            reason,
        }
    }

    fn parse_record(record: &csv::StringRecord) -> Result<Sample, String> {
        if record.len() != 2 {
            return Err(format!("expected 2 fields, found {}", record.len()));
        }

        let timestamp = NaiveDateTime::parse_from_str(record[0].trim(), TIMESTAMP_FORMAT)
            .map_err(|e| format!("bad timestamp {:?}: {}", &record[0], e))?;
        let value = record[1]
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("bad value {:?}: {}", &record[1], e))?;

        Ok(Sample::new(timestamp, value))
    }
}

fn write_rows(path: &Path, rows: &[&Sample]) -> Result<(), StoreError> {
    let file = std::fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    for sample in rows {
        writer
            .write_record([
                sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                sample.value.to_string(),
            ])
            .map_err(|e| StoreError::io(path, e.into()))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}
