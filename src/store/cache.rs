use super::{write_atomic, PaperCache, StoreError};
use crate::paper::Paper;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// One pretty-printed JSON file per paper under a cache directory.
pub struct DirCache {
    dir: PathBuf,
}

impl DirCache {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        let file: String = id
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl PaperCache for DirCache {
    fn get(&self, id: &str) -> Option<Paper> {
        let path = self.entry_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(id, error = %e, "unable to read cached paper");
                return None;
            }
        };
        match serde_json::from_str::<Paper>(&contents) {
            Ok(paper) if paper.id != id => {
                debug!(id, stored = %paper.id, "cache file belongs to another id");
                None
            }
            Ok(paper) => {
                debug!(id, "loaded paper from cache");
                Some(paper)
            }
            Err(e) => {
                warn!(id, error = %e, "cached paper is malformed, ignoring");
                None
            }
        }
    }

    fn put(&self, paper: &Paper) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(paper)?;
        write_atomic(&self.entry_path(&paper.id), &json)?;
        debug!(id = %paper.id, "cached paper");
        Ok(())
    }

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    papers: Mutex<HashMap<String, Paper>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.papers.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PaperCache for MemoryCache {
    fn get(&self, id: &str) -> Option<Paper> {
        self.papers.lock().ok()?.get(id).cloned()
    }

    fn put(&self, paper: &Paper) -> Result<(), StoreError> {
        if let Ok(mut papers) = self.papers.lock() {
            papers.insert(paper.id.clone(), paper.clone());
        }
        Ok(())
    }

    fn contains(&self, id: &str) -> bool {
        self.papers
            .lock()
            .map(|p| p.contains_key(id))
            .unwrap_or(false)
    }
}
