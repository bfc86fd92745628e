//! Persistent record of every track that made it to the platform.
//!
//! The history file is a JSON object keyed by the original audio filename:
//!
//! ```json
//! {
//!   "track.mp3": {
//!     "video_id": "dQw4w9WgXcQ",
//!     "upload_time": "2024-03-01T18:22:05.123+00:00",
//!     "title": "track"
//!   }
//! }
//! ```

use std::{
  collections::{BTreeMap, HashMap},
  fs,
  io::{self, Write},
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
  pub video_id: String,
  #[serde(with = "upload_time")]
  pub upload_time: DateTime<Utc>,
  pub title: String,
}

impl HistoryRecord {
  /// A record stamped with the current time.
  pub fn now(video_id: impl Into<String>, title: impl Into<String>) -> Self {
    Self {
      video_id: video_id.into(),
      upload_time: Utc::now(),
      title: title.into(),
    }
  }
}

/// In-memory history mapping, written through to disk on every change.
#[derive(Debug)]
pub struct HistoryStore {
  path: PathBuf,
  records: HashMap<String, HistoryRecord>,
}

impl HistoryStore {
  /// Load the history at `path`. A missing or zero-length file is an empty
  /// history; anything else that does not parse is
  /// [`Error::HistoryCorrupt`].
  pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let records = match fs::read(&path) {
      Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => HashMap::new(),
      Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::HistoryCorrupt {
        path: path.clone(),
        source,
      })?,
      Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
      Err(e) => return Err(e.into()),
    };
    debug!(path = %path.display(), entries = records.len(), "Loaded upload history");
    Ok(Self { path, records })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn contains(&self, filename: &str) -> bool {
    self.records.contains_key(filename)
  }

  pub fn get(&self, filename: &str) -> Option<&HistoryRecord> {
    self.records.get(filename)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// All entries, oldest upload first.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &HistoryRecord)> {
    let mut entries: Vec<_> = self
      .records
      .iter()
      .map(|(name, record)| (name.as_str(), record))
      .collect();
    entries.sort_by(|a, b| a.1.upload_time.cmp(&b.1.upload_time).then(a.0.cmp(b.0)));
    entries.into_iter()
  }

  /// Insert or overwrite the entry for `filename` and persist immediately.
  /// If the file cannot be written the in-memory entry is rolled back, so
  /// memory never claims more than the disk does.
  pub fn record(&mut self, filename: impl Into<String>, record: HistoryRecord) -> Result<()> {
    let filename = filename.into();
    let previous = self.records.insert(filename.clone(), record);
    if let Err(e) = self.persist() {
      match previous {
        Some(old) => self.records.insert(filename, old),
        None => self.records.remove(&filename),
      };
      return Err(e);
    }
    info!(file = %filename, path = %self.path.display(), "Recorded upload");
    Ok(())
  }

  /// Write the whole mapping to a temporary file next to the target, then
  /// rename it into place.
  fn persist(&self) -> Result<()> {
    let dir = match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let sorted: BTreeMap<&String, &HistoryRecord> = self.records.iter().collect();
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, &sorted)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(&self.path).map_err(|e| e.error)?;
    Ok(())
  }
}

/// RFC 3339 on write. On read, also the offset-less local timestamps older
/// versions of the tool wrote (`2024-03-01T18:22:05.123456`).
mod upload_time {
  use chrono::{DateTime, Local, NaiveDateTime, Utc};
  use serde::{de, Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid upload_time `{raw}`")))
  }

  pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
      return Some(time.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(
      naive
        .and_local_timezone(Local)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc()),
    )
  }
}
