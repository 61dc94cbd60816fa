// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Filesystem-based ledger
//!
//! Stores one JSON document per run in the ledger directory. Writes go to a
//! temporary file that is then renamed over the record, so a crash leaves
//! either the previous or the next state on disk, never a torn one.
//! Cancellation uses a separate `<run_id>.cancel` marker so `cancel-run`
//! from another process never races with the engine's own writes.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    is_expired, seal, validate_run_id, ResumeOptions, RunLedger, RunRecord, TaskRecord,
    Transition,
};
use crate::errors::GateflowError;

/// Filesystem-based ledger
pub struct FileLedger {
    /// Ledger directory
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileLedger {
    /// Open (and create if needed) a ledger directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GateflowError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                GateflowError::ledger(format!(
                    "Failed to create ledger directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn record_path(&self, run_id: &str) -> Result<PathBuf, GateflowError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    fn cancel_path(&self, run_id: &str) -> Result<PathBuf, GateflowError> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.cancel", run_id)))
    }

    async fn read(&self, run_id: &str) -> Result<Option<RunRecord>, GateflowError> {
        let path = self.record_path(run_id)?;
        if !path.exists() {
            return Ok(None);
        }

        let content =
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| GateflowError::FileReadError {
                    path: path.clone(),
                    error: e.to_string(),
                })?;

        let record = serde_json::from_str(&content).map_err(|e| {
            GateflowError::ledger(format!("Failed to parse '{}': {}", path.display(), e))
        })?;

        Ok(Some(record))
    }

    async fn write(&self, record: &RunRecord) -> Result<(), GateflowError> {
        let path = self.record_path(&record.run_id)?;
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(record)?;

        let write_err = |e: std::io::Error| GateflowError::FileWriteError {
            path: tmp.clone(),
            error: e.to_string(),
        };
        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
        file.write_all(json.as_bytes()).await.map_err(write_err)?;
        // Flush to disk before the rename makes it the record of truth
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| GateflowError::FileWriteError {
                path: path.clone(),
                error: e.to_string(),
            })?;

        Ok(())
    }

    /// Load, mutate and store a run under the write lock
    async fn update<T>(
        &self,
        run_id: &str,
        mutate: impl FnOnce(&mut RunRecord) -> Result<T, GateflowError> + Send,
    ) -> Result<T, GateflowError> {
        let _guard = self.write_lock.lock().await;

        let mut record = self
            .read(run_id)
            .await?
            .ok_or_else(|| GateflowError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        let result = mutate(&mut record)?;
        self.write(&record).await?;

        Ok(result)
    }

    async fn clear_cancel(&self, run_id: &str) -> Result<(), GateflowError> {
        let path = self.cancel_path(run_id)?;
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| GateflowError::FileWriteError {
                    path,
                    error: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl RunLedger for FileLedger {
    async fn create(&self, record: RunRecord) -> Result<(), GateflowError> {
        let _guard = self.write_lock.lock().await;

        if self.record_path(&record.run_id)?.exists() {
            return Err(GateflowError::RunAlreadyExists {
                run_id: record.run_id,
            });
        }

        // Stale marker from a purged run with the same id
        self.clear_cancel(&record.run_id).await?;
        self.write(&record).await
    }

    async fn load(&self, run_id: &str) -> Result<Option<RunRecord>, GateflowError> {
        self.read(run_id).await
    }

    async fn record_transition(
        &self,
        run_id: &str,
        task_id: &str,
        transition: Transition,
    ) -> Result<TaskRecord, GateflowError> {
        self.update(run_id, |record| record.apply(task_id, transition))
            .await
    }

    async fn finish(&self, run_id: &str) -> Result<RunRecord, GateflowError> {
        let sealed = self
            .update(run_id, |record| {
                seal(record)?;
                Ok(record.clone())
            })
            .await?;
        self.clear_cancel(run_id).await?;
        Ok(sealed)
    }

    async fn resume(
        &self,
        run_id: &str,
        options: ResumeOptions,
    ) -> Result<BTreeSet<String>, GateflowError> {
        let pending = self
            .update(run_id, |record| Ok(record.prepare_resume(options)))
            .await?;
        self.clear_cancel(run_id).await?;
        Ok(pending)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<(), GateflowError> {
        if !self.record_path(run_id)?.exists() {
            return Err(GateflowError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }

        let path = self.cancel_path(run_id)?;
        tokio::fs::write(&path, b"")
            .await
            .map_err(|e| GateflowError::FileWriteError {
                path,
                error: e.to_string(),
            })
    }

    async fn is_cancel_requested(&self, run_id: &str) -> Result<bool, GateflowError> {
        Ok(self.cancel_path(run_id)?.exists())
    }

    async fn list(&self) -> Result<Vec<RunRecord>, GateflowError> {
        let mut runs = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            GateflowError::ledger(format!("Failed to read ledger directory: {}", e))
        })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GateflowError::ledger(format!("Failed to read ledger entry: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(run_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_run_id(run_id).is_err() {
                continue;
            }

            match self.read(run_id).await {
                Ok(Some(record)) => runs.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable run record"),
            }
        }

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn purge_expired(&self, retention: Duration) -> Result<Vec<String>, GateflowError> {
        let _guard = self.write_lock.lock().await;
        let now = SystemTime::now();
        let mut purged = Vec::new();

        for record in self.list().await? {
            if !is_expired(&record, retention, now) {
                continue;
            }

            let path = self.record_path(&record.run_id)?;
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| GateflowError::FileWriteError {
                    path,
                    error: e.to_string(),
                })?;
            self.clear_cancel(&record.run_id).await?;
            purged.push(record.run_id);
        }

        Ok(purged)
    }
}
