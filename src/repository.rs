use crate::highlight::{DraftError, Highlight, HighlightDraft, NotePatch, generate_object_id};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const MEMORY_URL: &str = "memory:";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("unsupported highlight store url `{0}` (expected `memory:` or `file:<path>`)")]
    UnsupportedUrl(String),
    #[error("highlight store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("highlight snapshot at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize highlight snapshot: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error(transparent)]
    InvalidDraft(#[from] DraftError),
}

/// Where the collection lives, parsed from a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    File(PathBuf),
}

impl StoreLocation {
    pub fn parse(url: &str) -> Result<Self, RepositoryError> {
        let url = url.trim();
        if url.is_empty() || url == MEMORY_URL || url == "memory://" {
            return Ok(Self::Memory);
        }
        let path = url
            .strip_prefix("file://")
            .or_else(|| url.strip_prefix("file:"))
            .filter(|path| !path.is_empty())
            .ok_or_else(|| RepositoryError::UnsupportedUrl(url.to_string()))?;
        Ok(Self::File(PathBuf::from(path)))
    }
}

/// Server-side highlight collection shared across handlers.
///
/// Every mutation runs under the write lock: it is applied to a copy, the
/// copy is persisted, and only then does it replace the live collection, so
/// a failed write leaves memory and disk agreeing.
#[derive(Clone)]
pub struct HighlightRepository {
    shared: Arc<RepositoryShared>,
}

struct RepositoryShared {
    inner: RwLock<Vec<Highlight>>,
    persistence: SnapshotPersistence,
}

impl HighlightRepository {
    pub fn open(url: &str) -> Result<Self, RepositoryError> {
        match StoreLocation::parse(url)? {
            StoreLocation::Memory => Ok(Self::ephemeral()),
            StoreLocation::File(path) => Self::persistent(path),
        }
    }

    pub fn ephemeral() -> Self {
        Self::with_records(Vec::new(), None)
    }

    /// Opens (or starts) the JSON snapshot at `path`.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let records = load_snapshot(&path)?;
        info!(path = %path.display(), count = records.len(), "opened highlight store");
        Ok(Self::with_records(records, Some(path)))
    }

    fn with_records(records: Vec<Highlight>, path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(RepositoryShared {
                inner: RwLock::new(records),
                persistence: SnapshotPersistence { path },
            }),
        }
    }

    pub fn location(&self) -> StoreLocation {
        match &self.shared.persistence.path {
            Some(path) => StoreLocation::File(path.clone()),
            None => StoreLocation::Memory,
        }
    }

    pub fn list(&self) -> Vec<Highlight> {
        self.shared.inner.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Highlight> {
        let guard = self.shared.inner.read();
        guard.iter().find(|highlight| highlight.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates `draft`, assigns an id and creation time, and stores it.
    pub fn insert(&self, draft: HighlightDraft) -> Result<Highlight, RepositoryError> {
        draft.validate()?;
        let highlight = draft.into_highlight(generate_object_id(), Utc::now());
        let created = highlight.clone();
        self.mutate(move |records| {
            records.push(highlight);
            Some(())
        })?;
        Ok(created)
    }

    /// Applies `patch` to the record with `id`. `Ok(None)` when absent.
    pub fn update_note(
        &self,
        id: &str,
        patch: NotePatch,
    ) -> Result<Option<Highlight>, RepositoryError> {
        self.mutate(|records| {
            let highlight = records.iter_mut().find(|highlight| highlight.id == id)?;
            patch.apply(highlight);
            Some(highlight.clone())
        })
    }

    /// Removes the record with `id`. `Ok(None)` when absent.
    pub fn delete(&self, id: &str) -> Result<Option<Highlight>, RepositoryError> {
        self.mutate(|records| {
            let index = records.iter().position(|highlight| highlight.id == id)?;
            Some(records.remove(index))
        })
    }

    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Highlight>) -> Option<T>,
    ) -> Result<Option<T>, RepositoryError> {
        let mut guard = self.shared.inner.write();
        let mut next = guard.clone();
        let Some(outcome) = change(&mut next) else {
            return Ok(None);
        };
        self.shared.persistence.write_snapshot(&next)?;
        *guard = next;
        Ok(Some(outcome))
    }
}

struct SnapshotPersistence {
    path: Option<PathBuf>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    captured_at: i64,
    highlights: &'a [Highlight],
}

#[derive(Deserialize)]
struct Snapshot {
    highlights: Vec<Highlight>,
}

impl SnapshotPersistence {
    /// Writes to a sibling temp file and renames it over the snapshot.
    fn write_snapshot(&self, records: &[Highlight]) -> Result<(), RepositoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_err = |source| RepositoryError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(&SnapshotRef {
            captured_at: Utc::now().timestamp(),
            highlights: records,
        })
        .map_err(RepositoryError::Serialize)?;

        let staging = path.with_extension("json.tmp");
        let result = fs::File::create(&staging)
            .and_then(|mut file| {
                file.write_all(&bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, path));
        if let Err(err) = result {
            warn!(error = %err, path = %path.display(), "failed to write highlight snapshot");
            let _ = fs::remove_file(&staging);
            return Err(io_err(err));
        }
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<Highlight>, RepositoryError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(RepositoryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).map_err(|source| RepositoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(snapshot.highlights)
}
