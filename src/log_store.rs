use serde::{ Deserialize, Serialize };

use std::fs::{ self, OpenOptions };
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use std::sync::Mutex;

use crate::error::LprError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One plate sighting as stored in the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub plate_text: String,
    pub timestamp: String,
}

/// Append-only plate log backed by a headerless two-column csv file.
pub struct LogStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogStore {

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `plate_text` stamped with the current local time.
    pub fn append(&self, plate_text: &str) -> Result<LogRecord, LprError> {
        let record = LogRecord {
            plate_text: plate_text.to_string(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        };

        // a poisoned lock only means another append panicked mid-write
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(LprError::log_write)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(&record).map_err(LprError::log_write)?;
        writer.flush().map_err(LprError::log_write)?;
        Ok(record)
    }

    /// All records in insertion order.
    ///
    /// Historical corruption never fails the read: NUL bytes are stripped and rows
    /// that do not have exactly two fields are skipped.
    pub fn read_all(&self) -> Result<Vec<LogRecord>, LprError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&raw).replace('\0', "");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());
        let records = reader.records()
            .filter_map(|row| row.ok())
            .filter(|row| row.len() == 2)
            .map(|row| LogRecord {
                plate_text: row[0].to_string(),
                timestamp: row[1].to_string(),
            })
            .collect();
        Ok(records)
    }

    /// Records newest first, the order a log view shows them in.
    pub fn recent(&self) -> Result<Vec<LogRecord>, LprError> {
        let mut records = self.read_all()?;
        records.reverse();
        Ok(records)
    }
}
