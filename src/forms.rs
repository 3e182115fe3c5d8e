//! Durable form-completion state.
//!
//! The only durable entity in the system. Flags are monotonic: once a user
//! is marked completed or link-sent, no code path clears the flag — the
//! memory eviction sweep in particular never touches this store.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt as _;
use tokio::sync::Mutex;

/// Store cardinalities for the health endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FormCounts {
    pub completed: usize,
    pub link_sent: usize,
}

/// Injected storage abstraction for the durable form flags.
///
/// The durability mechanism is swappable without touching the dispatcher.
/// Mutations return `true` when the flag actually transitioned false→true,
/// which is what makes duplicate deliveries replay-safe (at-most-once alert
/// per completion).
#[async_trait]
pub trait FormStore: Send + Sync {
    async fn mark_completed(&self, user_id: &str) -> Result<bool, StoreError>;
    async fn mark_link_sent(&self, user_id: &str) -> Result<bool, StoreError>;
    async fn is_completed(&self, user_id: &str) -> bool;
    async fn is_link_sent(&self, user_id: &str) -> bool;
    async fn counts(&self) -> FormCounts;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sets {
    #[serde(default)]
    completed: BTreeSet<String>,
    #[serde(default)]
    link_sent: BTreeSet<String>,
}

/// Flat-file `FormStore`: `{"completed": [...], "link_sent": [...]}`,
/// rewritten wholesale on every mutation.
///
/// Every mutating call writes a temp file, fsyncs, and atomically renames
/// before returning, so a crash immediately after a successful mark cannot
/// lose the flag. Duplicate marks are idempotent no-ops that skip the
/// rewrite entirely.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Sets>,
}

impl JsonFileStore {
    /// Open the store, loading the full contents of the backing file.
    ///
    /// A missing or corrupt file degrades to empty sets with a warning,
    /// never an error: losing the read is recoverable, refusing to start
    /// is not.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sets = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(sets) => sets,
                Err(error) => {
                    tracing::warn!(
                        %error,
                        path = %path.display(),
                        "form state file is corrupt, starting from empty sets"
                    );
                    Sets::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Sets::default(),
            Err(error) => {
                tracing::warn!(
                    %error,
                    path = %path.display(),
                    "failed to read form state file, starting from empty sets"
                );
                Sets::default()
            }
        };
        Self {
            path,
            state: Mutex::new(sets),
        }
    }

    async fn persist(&self, sets: &Sets) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(sets).map_err(|error| self.persist_error(error))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|error| self.persist_error(error))?;
        file.write_all(&bytes)
            .await
            .map_err(|error| self.persist_error(error))?;
        file.sync_all()
            .await
            .map_err(|error| self.persist_error(error))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|error| self.persist_error(error))?;
        Ok(())
    }

    fn persist_error(&self, source: impl Into<anyhow::Error>) -> StoreError {
        StoreError::Persist {
            path: self.path.display().to_string(),
            source: source.into(),
        }
    }
}

#[async_trait]
impl FormStore for JsonFileStore {
    async fn mark_completed(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut sets = self.state.lock().await;
        if !sets.completed.insert(user_id.to_string()) {
            return Ok(false);
        }
        self.persist(&sets).await?;
        Ok(true)
    }

    async fn mark_link_sent(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut sets = self.state.lock().await;
        if !sets.link_sent.insert(user_id.to_string()) {
            return Ok(false);
        }
        self.persist(&sets).await?;
        Ok(true)
    }

    async fn is_completed(&self, user_id: &str) -> bool {
        self.state.lock().await.completed.contains(user_id)
    }

    async fn is_link_sent(&self, user_id: &str) -> bool {
        self.state.lock().await.link_sent.contains(user_id)
    }

    async fn counts(&self) -> FormCounts {
        let sets = self.state.lock().await;
        FormCounts {
            completed: sets.completed.len(),
            link_sent: sets.link_sent.len(),
        }
    }
}
