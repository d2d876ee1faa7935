//! Per-experiment capture log.
//!
//! `Metadata/<experiment>.json` holds a JSON array with one record per saved
//! capture. Records are appended in memory and written out on [`MetadataStore::flush`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One saved capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Plot number, zero-padded (e.g. `"007"`)
    pub number: String,
    /// Local time of capture, `%H:%M:%S`
    pub time: String,
    /// Local date of capture, `%d/%m/%Y`
    pub date: String,
    /// Tilt on the x axis when the capture fired
    pub xpos: f64,
    /// Tilt on the y axis when the capture fired
    pub ypos: f64,
    /// Experiment name
    pub name: String,
}

impl MetadataRecord {
    /// Build a record stamped with `now`.
    pub fn new(
        plot_number: u32,
        padding: usize,
        now: chrono::DateTime<chrono::Local>,
        tilt: (f64, f64),
        experiment: &str,
    ) -> Self {
        Self {
            number: pad_plot_number(plot_number, padding),
            time: now.format("%H:%M:%S").to_string(),
            date: now.format("%d/%m/%Y").to_string(),
            xpos: tilt.0,
            ypos: tilt.1,
            name: experiment.to_string(),
        }
    }
}

/// Left-pad `number` with zeros to `width` digits.
pub fn pad_plot_number(number: u32, width: usize) -> String {
    format!("{:0width$}", number, width = width)
}

/// Error type for metadata operations.
#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    /// The file exists but is not a JSON array of records
    Parse { path: PathBuf, message: String },
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(e) => write!(f, "Metadata I/O error: {}", e),
            MetadataError::Parse { path, message } => {
                write!(f, "Corrupt metadata file {}: {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Io(e)
    }
}

/// In-memory copy of an experiment's metadata file.
#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    records: Vec<MetadataRecord>,
    dirty: bool,
}

impl MetadataStore {
    /// Load the records at `path`. A missing or empty file is an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetadataError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Vec::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| MetadataError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} metadata records from {}", records.len(), path.display());
        Ok(Self {
            path,
            records,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    fn records(&self) -> &[MetadataRecord] {
        &self.records
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether records were added since the last flush.
    #[cfg(test)]
    fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn append(&mut self, record: MetadataRecord) {
        self.records.push(record);
        self.dirty = true;
    }

    /// Plot number of the last record, `None` when the log is empty.
    ///
    /// Records whose number is not numeric are skipped.
    pub fn last_index(&self) -> Option<u32> {
        self.records
            .iter()
            .rev()
            .find_map(|record| record.number.trim().parse().ok())
    }

    /// Write the records to disk if anything changed.
    ///
    /// The file is written to a sibling temp file and renamed into place.
    pub fn flush(&mut self) -> Result<(), MetadataError> {
        if !self.dirty {
            return Ok(());
        }

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.records
            .serialize(&mut serializer)
            .map_err(|e| MetadataError::Io(std::io::Error::other(e)))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &buf)?;
        std::fs::rename(&tmp, &self.path)?;

        self.dirty = false;
        info!(
            "Saved {} metadata records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(number: &str) -> MetadataRecord {
        MetadataRecord {
            number: number.to_string(),
            time: "10:00:00".to_string(),
            date: "01/06/2026".to_string(),
            xpos: 0.01,
            ypos: -0.02,
            name: "field".to_string(),
        }
    }

    #[test]
    fn test_padding() {
        assert_eq!(pad_plot_number(7, 3), "007");
        assert_eq!(pad_plot_number(42, 3), "042");
        assert_eq!(pad_plot_number(1234, 3), "1234");
    }

    #[test]
    fn test_record_formats_time_and_date() {
        let now = chrono::Local
            .with_ymd_and_hms(2026, 6, 1, 9, 5, 3)
            .single()
            .unwrap();
        let record = MetadataRecord::new(12, 3, now, (0.1, -0.1), "field");
        assert_eq!(record.number, "012");
        assert_eq!(record.time, "09:05:03");
        assert_eq!(record.date, "01/06/2026");
        assert_eq!(record.name, "field");
    }

    #[test]
    fn test_missing_or_empty_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("field.json")).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.last_index(), None);

        let path = dir.path().join("empty.json");
        std::fs::write(&path, "").unwrap();
        assert!(MetadataStore::open(&path).unwrap().is_empty());
    }

    #[test]
    fn test_flush_writes_indented_array_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.json");
        let mut store = MetadataStore::open(&path).unwrap();
        store.append(record("001"));
        store.append(record("002"));
        assert!(store.is_dirty());
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n    {\n        \"number\": \"001\""));

        let reloaded = MetadataStore::open(&path).unwrap();
        assert_eq!(reloaded.records(), store.records());
        assert_eq!(reloaded.last_index(), Some(2));
    }

    #[test]
    fn test_flush_skipped_when_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("field.json");
        let mut store = MetadataStore::open(&path).unwrap();
        store.flush().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_last_index_uses_last_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::open(dir.path().join("m.json")).unwrap();
        store.append(record("005"));
        store.append(record("017"));
        assert_eq!(store.last_index(), Some(17));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, "{\"number\": 1}").unwrap();
        assert!(matches!(
            MetadataStore::open(&path),
            Err(MetadataError::Parse { .. })
        ));
    }
}
