use super::{write_atomic, SeenStore, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Seen ids persisted as one JSON object: `{"2401.01234v1": "2024-01-02T10:00:00+00:00"}`.
pub struct JsonSeenRegistry {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl JsonSeenRegistry {
    /// A missing or unreadable file starts an empty registry; only a warning is emitted.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(map) => {
                    debug!(path = %path.display(), count = map.len(), "loaded seen registry");
                    map
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "seen registry unparsable, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "seen registry unreadable, starting fresh");
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SeenStore for JsonSeenRegistry {
    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).and_then(|raw| parse_timestamp(raw))
    }

    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) {
        self.entries.insert(id.to_string(), at.to_rfc3339());
        self.dirty = true;
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        let json = serde_json::to_vec(&self.entries)?;
        write_atomic(&self.path, &json)?;
        self.dirty = false;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemorySeenRegistry {
    entries: BTreeMap<String, String>,
    flushes: usize,
}

impl MemorySeenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now().to_rfc3339();
        Self {
            entries: ids.into_iter().map(|id| (id.into(), now.clone())).collect(),
            flushes: 0,
        }
    }

    /// Number of times `flush` was called.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl SeenStore for MemorySeenRegistry {
    fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn last_seen(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).and_then(|raw| parse_timestamp(raw))
    }

    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) {
        self.entries.insert(id.to_string(), at.to_rfc3339());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        self.flushes += 1;
        Ok(())
    }
}

/// RFC 3339 first, then a naive ISO-8601 stamp read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_empty_registry() {
        let tmp = TempDir::new().unwrap();
        let registry = JsonSeenRegistry::load(tmp.path().join("seen.json"));
        assert!(registry.is_empty());
    }

    #[test]
    fn garbage_file_is_empty_registry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("seen.json");
        fs::write(&path, "{not json").unwrap();
        let registry = JsonSeenRegistry::load(&path);
        assert!(registry.is_empty());
    }

    #[test]
    fn flush_then_reload_keeps_ids_and_timestamps() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("seen.json");
        let at = Utc::now();

        let mut registry = JsonSeenRegistry::load(&path);
        registry.mark_seen("2401.00001v1", at);
        registry.flush().unwrap();

        let reloaded = JsonSeenRegistry::load(&path);
        assert!(reloaded.contains("2401.00001v1"));
        assert_eq!(
            reloaded.last_seen("2401.00001v1").map(|t| t.timestamp()),
            Some(at.timestamp())
        );
    }

    #[test]
    fn reads_naive_iso_timestamps() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("seen.json");
        fs::write(
            &path,
            r#"{"2401.00001v1": "2025-03-04T16:00:01.123456", "2401.00002v1": "yesterday"}"#,
        )
        .unwrap();

        let registry = JsonSeenRegistry::load(&path);
        assert_eq!(registry.len(), 2);
        assert!(registry.last_seen("2401.00001v1").is_some());
        assert!(registry.contains("2401.00002v1"));
        assert!(registry.last_seen("2401.00002v1").is_none());
    }

    #[test]
    fn flush_failure_keeps_memory_state() {
        let tmp = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = tmp.path().join("seen.json");
        fs::create_dir_all(path.join("blocker")).unwrap();

        let mut registry = JsonSeenRegistry::load(&path);
        registry.mark_seen("a", Utc::now());
        assert!(registry.flush().is_err());
        assert!(registry.contains("a"));
    }
}
