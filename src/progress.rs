//! Progress store: the durable checkpoint that makes runs resumable.
//!
//! The store is the only writer of the progress file. Every mutation is a
//! serialized read-modify-write under one lock, and every write goes to a
//! temporary sibling that is fsynced and renamed over the file, so a crash
//! at any point leaves the previously committed state readable.

use crate::error::{Error, Result};
use crate::model::{ProgressState, TaskOutcome};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressState>,
}

impl ProgressStore {
    /// Load the progress file and take ownership of it.
    ///
    /// A file that does not parse is moved aside to `<file>.corrupt` and the
    /// store starts empty. The loaded state is written back immediately so
    /// that an unwritable location is reported before any work starts.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = match read(&path).await? {
            Loaded::Missing => ProgressState::default(),
            Loaded::Parsed(state) => state,
            Loaded::Corrupt(e) => {
                quarantine(&path, &e).await;
                ProgressState::default()
            }
        };
        write_atomic(&path, &state).await?;
        debug!(
            path = %path.display(),
            completed = state.completed.len(),
            failed = state.failed.len(),
            "progress store opened"
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Read a progress file without taking ownership. Never touches the file.
    ///
    /// A missing or unparseable file reads as an empty state. Any other read
    /// failure is a checkpoint error.
    pub async fn load(path: &Path) -> Result<ProgressState> {
        Ok(match read(path).await? {
            Loaded::Missing => ProgressState::default(),
            Loaded::Parsed(state) => state,
            Loaded::Corrupt(e) => {
                warn!(path = %path.display(), error = %e, "progress file is corrupt, reading as empty");
                ProgressState::default()
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> ProgressState {
        self.state.lock().await.clone()
    }

    /// Fold one outcome into the state and persist it.
    ///
    /// The in-memory state only advances once the write has landed, so
    /// memory and disk never disagree about what is committed.
    pub async fn record(&self, outcome: &TaskOutcome) -> Result<()> {
        self.update(|state| state.apply(outcome)).await
    }

    /// Record how many tasks this run planned.
    pub async fn set_total_planned(&self, total_planned: usize) -> Result<()> {
        self.update(|state| {
            state.total_planned = total_planned;
            state.last_updated = chrono::Utc::now();
        })
        .await
    }

    /// Rewrite the current state.
    pub async fn flush(&self) -> Result<()> {
        let state = self.state.lock().await;
        write_atomic(&self.path, &state).await
    }

    async fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ProgressState),
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        mutate(&mut next);
        write_atomic(&self.path, &next).await?;
        *state = next;
        Ok(())
    }
}

enum Loaded {
    Missing,
    Parsed(ProgressState),
    Corrupt(serde_json::Error),
}

async fn read(path: &Path) -> Result<Loaded> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Loaded::Missing),
        Err(e) => return Err(Error::checkpoint(path, e)),
    };
    Ok(match serde_json::from_str::<ProgressState>(&content) {
        Ok(state) => Loaded::Parsed(state),
        Err(e) => Loaded::Corrupt(e),
    })
}

/// Move a corrupt file aside. An earlier quarantine is never overwritten.
async fn quarantine(path: &Path, error: &serde_json::Error) {
    let mut target = sibling(path, "corrupt");
    if tokio::fs::try_exists(&target).await.unwrap_or(true) {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        target = sibling(path, &format!("corrupt.{stamp}"));
    }
    warn!(
        path = %path.display(),
        quarantine = %target.display(),
        error = %error,
        "progress file is corrupt, starting from empty state"
    );
    if let Err(e) = tokio::fs::rename(path, &target).await {
        warn!(path = %path.display(), error = %e, "could not move corrupt progress file aside");
    }
}

/// Path of the temporary file a write goes through before the rename.
pub fn temp_path(path: &Path) -> PathBuf {
    sibling(path, "tmp")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "progress.json".into());
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, state: &ProgressState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state).map_err(|e| Error::checkpoint(path, e))?;
    let tmp = temp_path(path);

    let write = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    };

    if let Err(e) = write.await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::checkpoint(path, e));
    }
    Ok(())
}
