// Key/value storage for buffer snapshots: a directory of JSON files, or memory.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot quota exceeded ({size} > {limit} bytes)")]
    QuotaExceeded { size: usize, limit: usize },
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encode: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait SnapshotBackend: Send {
    fn read(&self, key: &str) -> Result<Option<String>, SnapshotError>;
    fn write(&mut self, key: &str, payload: &str) -> Result<(), SnapshotError>;
}

fn check_quota(payload: &str, max_bytes: Option<usize>) -> Result<(), SnapshotError> {
    match max_bytes {
        Some(limit) if payload.len() > limit => Err(SnapshotError::QuotaExceeded {
            size: payload.len(),
            limit,
        }),
        _ => Ok(()),
    }
}

/// One `<key>.json` per key under `dir`; writes go to a temp file then rename.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    max_bytes: Option<usize>,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: Option<usize>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, max_bytes })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SnapshotBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, key: &str, payload: &str) -> Result<(), SnapshotError> {
        check_quota(payload, self.max_bytes)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, String>,
    max_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Stores `payload` without quota checks (seeding tests and migrations).
    pub fn insert(&mut self, key: &str, payload: impl Into<String>) {
        self.entries.insert(key.to_string(), payload.into());
    }
}

impl SnapshotBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, payload: &str) -> Result<(), SnapshotError> {
        check_quota(payload, self.max_bytes)?;
        self.entries.insert(key.to_string(), payload.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backend_round_trips_and_reports_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut b = FileBackend::new(dir.path().join("snaps"), None).unwrap();
        assert!(b.read("k").unwrap().is_none());
        b.write("k", "{\"a\":1}").unwrap();
        assert_eq!(b.read("k").unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(b.path_for("k").exists());
        assert!(!b.path_for("k").with_extension("json.tmp").exists());
    }

    #[test]
    fn quota_rejects_oversized_payload() {
        let mut b = MemoryBackend::with_quota(4);
        b.write("k", "1234").unwrap();
        let err = b.write("k", "12345").unwrap_err();
        assert!(matches!(err, SnapshotError::QuotaExceeded { size: 5, limit: 4 }));
        assert_eq!(b.read("k").unwrap().as_deref(), Some("1234"));
    }
}
