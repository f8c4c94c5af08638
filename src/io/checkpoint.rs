//! Checkpoint records and their on-disk store.
//!
//! One JSON file per (name, rank, step):
//!
//! ```text
//! {name}_checkpoint_rank{rank:04}_step{step:07}.json
//! ```
//!
//! holding the state and auxiliary host snapshots, the simulation time and
//! step counter, the element precision and a creation timestamp. Files are
//! written to a temporary name and renamed into place, so a crash while
//! writing never leaves a truncated checkpoint under the final name.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::{Precision, StateVector};

/// Error type for checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// I/O error during file operations.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded or decoded.
    #[error("checkpoint encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record does not fit the state it is restored into.
    #[error("checkpoint mismatch: {0}")]
    Mismatch(String),

    /// No checkpoint exists for this name and rank.
    #[error("no checkpoint '{name}' for rank {rank} in {}", directory.display())]
    NotFound {
        /// Run name searched for.
        name: String,
        /// Rank searched for.
        rank: usize,
        /// Directory searched.
        directory: PathBuf,
    },
}

/// Which checkpoints survive a new write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete older checkpoints of the same name and rank after each write.
    #[default]
    KeepLatestOnly,
    /// Never delete.
    KeepAll,
}

// =============================================================================
// Record
// =============================================================================

/// A persisted snapshot `(Q, aux, t, step)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub name: String,
    pub rank: usize,
    pub step: u64,
    pub time: f64,
    pub precision: Precision,
    pub created: DateTime<Utc>,
    pub state: Vec<f64>,
    pub aux: Option<Vec<f64>>,
}

impl CheckpointRecord {
    /// Snapshot `q` (and `aux`) after `step` steps at time `time`.
    pub fn capture<S: StateVector>(
        name: &str,
        rank: usize,
        step: u64,
        time: f64,
        q: &S,
        aux: Option<&S>,
    ) -> Self {
        Self {
            name: name.to_string(),
            rank,
            step,
            time,
            precision: q.precision(),
            created: Utc::now(),
            state: q.to_host(),
            aux: aux.map(|a| a.to_host()),
        }
    }

    /// Copy the snapshot into existing buffers.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Mismatch`] if the precision or a length differs,
    /// or if the record has no aux snapshot but `aux` was requested.
    pub fn restore_into<S: StateVector>(
        &self,
        q: &mut S,
        aux: Option<&mut S>,
    ) -> Result<(), CheckpointError> {
        if q.precision() != self.precision {
            return Err(CheckpointError::Mismatch(format!(
                "precision {:?} recorded, state is {:?}",
                self.precision,
                q.precision()
            )));
        }
        copy_snapshot(q, &self.state, "state")?;
        if let Some(aux) = aux {
            let data = self.aux.as_deref().ok_or_else(|| {
                CheckpointError::Mismatch("record holds no aux snapshot".into())
            })?;
            copy_snapshot(aux, data, "aux")?;
        }
        Ok(())
    }

    /// Rebuild `(Q, aux, t)` using `template` for shape and precision.
    ///
    /// # Errors
    ///
    /// Same as [`restore_into`](Self::restore_into).
    pub fn restore<S: StateVector>(
        &self,
        template: &S,
    ) -> Result<(S, Option<S>, f64), CheckpointError> {
        let mut q = template.zeros_like();
        self.restore_into(&mut q, None)?;
        let aux = match &self.aux {
            Some(data) => {
                let mut aux = template.zeros_like();
                copy_snapshot(&mut aux, data, "aux")?;
                Some(aux)
            }
            None => None,
        };
        Ok((q, aux, self.time))
    }
}

fn copy_snapshot<S: StateVector>(
    target: &mut S,
    data: &[f64],
    what: &str,
) -> Result<(), CheckpointError> {
    target.copy_from_host(data).map_err(|_| {
        CheckpointError::Mismatch(format!(
            "{} has {} elements, record holds {}",
            what,
            target.len(),
            data.len()
        ))
    })
}

// =============================================================================
// Store
// =============================================================================

/// Directory of checkpoints for one run name and rank.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    directory: PathBuf,
    name: String,
    rank: usize,
    retention: RetentionPolicy,
}

impl CheckpointStore {
    /// Open (and create if needed) `directory`.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Io`] if the directory cannot be created.
    pub fn new(
        directory: impl AsRef<Path>,
        name: &str,
        rank: usize,
        retention: RetentionPolicy,
    ) -> Result<Self, CheckpointError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            name: name.to_string(),
            rank,
            retention,
        })
    }

    /// File name of the checkpoint for `(name, rank, step)`.
    pub fn file_name(name: &str, rank: usize, step: u64) -> String {
        format!("{}_checkpoint_rank{:04}_step{:07}.json", name, rank, step)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Path of the checkpoint for `step`.
    pub fn path_for(&self, step: u64) -> PathBuf {
        self.directory
            .join(Self::file_name(&self.name, self.rank, step))
    }

    /// Persist `record`, then apply the retention policy.
    ///
    /// # Errors
    ///
    /// I/O and encoding failures. Failing to delete an old checkpoint is only
    /// logged.
    pub fn write(&self, record: &CheckpointRecord) -> Result<PathBuf, CheckpointError> {
        if record.name != self.name || record.rank != self.rank {
            return Err(CheckpointError::Mismatch(format!(
                "record '{}' rank {} written to store '{}' rank {}",
                record.name, record.rank, self.name, self.rank
            )));
        }
        let path = self.path_for(record.step);
        let tmp = path.with_extension("json.tmp");

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, record)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        info!(
            "checkpoint written: step {} t = {:.6} -> {}",
            record.step,
            record.time,
            path.display()
        );

        if self.retention == RetentionPolicy::KeepLatestOnly {
            for (step, old) in self.list()? {
                if step == record.step {
                    continue;
                }
                match fs::remove_file(&old) {
                    Ok(()) => debug!("removed old checkpoint {}", old.display()),
                    Err(err) => warn!("could not remove old checkpoint {}: {}", old.display(), err),
                }
            }
        }
        Ok(path)
    }

    /// Read the checkpoint at `path`.
    ///
    /// # Errors
    ///
    /// I/O and decoding failures.
    pub fn load(path: impl AsRef<Path>) -> Result<CheckpointRecord, CheckpointError> {
        let file = File::open(path.as_ref())?;
        let record = serde_json::from_reader(BufReader::new(file))?;
        Ok(record)
    }

    /// Read the checkpoint for `step`.
    pub fn load_step(&self, step: u64) -> Result<CheckpointRecord, CheckpointError> {
        let path = self.path_for(step);
        if !path.exists() {
            return Err(self.not_found());
        }
        Self::load(path)
    }

    /// Steps and paths of this store's checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, CheckpointError> {
        let prefix = format!("{}_checkpoint_rank{:04}_step", self.name, self.rank);
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let step = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok());
            if let Some(step) = step {
                found.push((step, entry.path()));
            }
        }
        found.sort_by_key(|(step, _)| *step);
        Ok(found)
    }

    /// The checkpoint with the highest step.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] if the store is empty.
    pub fn latest(&self) -> Result<CheckpointRecord, CheckpointError> {
        let (_, path) = self.list()?.pop().ok_or_else(|| self.not_found())?;
        Self::load(path)
    }

    fn not_found(&self) -> CheckpointError {
        CheckpointError::NotFound {
            name: self.name.clone(),
            rank: self.rank,
            directory: self.directory.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(step: u64) -> CheckpointRecord {
        let q = vec![0.1, 1.0 / 3.0, -2.5e-17];
        let aux = vec![7.0, 8.0, 9.0];
        CheckpointRecord::capture("run", 2, step, 0.1 * step as f64, &q, Some(&aux))
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            CheckpointStore::file_name("aquaplanet", 3, 120),
            "aquaplanet_checkpoint_rank0003_step0000120.json"
        );
    }

    #[test]
    fn test_write_and_load_exact() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "run", 2, RetentionPolicy::KeepAll).unwrap();
        let original = record(5);
        let path = store.write(&original).unwrap();
        assert!(path.ends_with("run_checkpoint_rank0002_step0000005.json"));

        let loaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_keep_latest_only_removes_older() {
        let dir = tempdir().unwrap();
        let store =
            CheckpointStore::new(dir.path(), "run", 2, RetentionPolicy::KeepLatestOnly).unwrap();
        for step in [1, 2, 3] {
            store.write(&record(step)).unwrap();
        }
        let steps: Vec<u64> = store.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![3]);
    }

    #[test]
    fn test_keep_all_retains_everything() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "run", 2, RetentionPolicy::KeepAll).unwrap();
        for step in [10, 2, 30] {
            store.write(&record(step)).unwrap();
        }
        let steps: Vec<u64> = store.list().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![2, 10, 30]);
        assert_eq!(store.latest().unwrap().step, 30);
    }

    #[test]
    fn test_other_ranks_untouched() {
        let dir = tempdir().unwrap();
        let other =
            CheckpointStore::new(dir.path(), "run", 0, RetentionPolicy::KeepAll).unwrap();
        let mut foreign = record(1);
        foreign.rank = 0;
        other.write(&foreign).unwrap();

        let store =
            CheckpointStore::new(dir.path(), "run", 2, RetentionPolicy::KeepLatestOnly).unwrap();
        store.write(&record(4)).unwrap();
        assert_eq!(other.list().unwrap().len(), 1);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_latest_on_empty_store() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "run", 0, RetentionPolicy::KeepAll).unwrap();
        assert!(matches!(store.latest(), Err(CheckpointError::NotFound { .. })));
        assert!(matches!(store.load_step(3), Err(CheckpointError::NotFound { .. })));
    }

    #[test]
    fn test_restore_checks_shape_and_precision() {
        let rec = record(1);
        let (q, aux, t) = rec.restore(&vec![0.0_f64; 3]).unwrap();
        assert_eq!(q, rec.state);
        assert_eq!(aux, Some(vec![7.0, 8.0, 9.0]));
        assert!((t - 0.1).abs() < 1e-15);

        let mut short = vec![0.0_f64; 2];
        assert!(matches!(
            rec.restore_into(&mut short, None),
            Err(CheckpointError::Mismatch(_))
        ));

        let mut single = vec![0.0_f32; 3];
        assert!(matches!(
            rec.restore_into(&mut single, None),
            Err(CheckpointError::Mismatch(_))
        ));
    }

    #[test]
    fn test_record_from_other_store_rejected() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "other", 2, RetentionPolicy::KeepAll).unwrap();
        assert!(matches!(store.write(&record(1)), Err(CheckpointError::Mismatch(_))));
    }
}
