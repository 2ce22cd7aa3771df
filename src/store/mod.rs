//! Durable state kept between runs.
//!
//! - [`SeenStore`] is the deduplication ledger: an id that is present is never
//!   returned by a search again.
//! - [`PaperCache`] is a read-through cache of full paper records.
//!
//! Both come with a file-backed and an in-memory implementation so engines
//! can be exercised without touching the filesystem.

mod cache;
mod seen;

pub use cache::{DirCache, MemoryCache};
pub use seen::{JsonSeenRegistry, MemorySeenRegistry};

use crate::paper::Paper;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait SeenStore: Send + Sync {
    fn contains(&self, id: &str) -> bool;

    /// When the id was last marked, if the stored timestamp can be read.
    fn last_seen(&self, id: &str) -> Option<DateTime<Utc>>;

    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All ids with their raw timestamps, sorted by id.
    fn entries(&self) -> Vec<(String, String)>;

    /// Persist pending changes. In-memory state stays authoritative on failure.
    fn flush(&mut self) -> Result<(), StoreError>;
}

pub trait PaperCache: Send + Sync {
    /// A miss (including an unreadable entry) is `None`, never an error.
    fn get(&self, id: &str) -> Option<Paper>;

    fn put(&self, paper: &Paper) -> Result<(), StoreError>;

    fn contains(&self, id: &str) -> bool;

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Write through a sibling temp file and rename, so a crash mid-write never
/// leaves a truncated file behind.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    let mut file = fs::File::create(tmp).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(tmp, path).map_err(io_err)
}
