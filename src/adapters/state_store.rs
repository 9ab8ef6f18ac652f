//! Crash-safe JSON checkpoint store.
//!
//! Layout next to the primary file `{stem}.json`:
//! - `.{file_name}.tmp`: staging file, written and fsynced before commit
//! - `{stem}.backup.json`: the previous primary, replaced on every commit
//! - `{stem}.backup-{timestamp}.json`: archives made by [`StateStore::archive`]
//!
//! A save never leaves a partially written primary: the new bytes are staged,
//! the old primary is copied aside, and the staged file is renamed into place.
//! `load` verifies the checksum and falls back to the rolling backup when the
//! primary is damaged.

use crate::domain::checkpoint::RunCheckpoint;
use crate::domain::error::SlicetraderError;
use crate::ports::checkpoint_port::CheckpointPort;
use chrono::Utc;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string())
    }

    fn sibling(&self, name: String) -> PathBuf {
        self.path.with_file_name(name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.sibling(format!("{}.backup.json", self.stem()))
    }

    pub fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_string());
        self.sibling(format!(".{file_name}.tmp"))
    }

    fn archive_prefix(&self) -> String {
        format!("{}.backup-", self.stem())
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // the mutex guards no data, so poisoning is harmless
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persistence(&self, e: io::Error) -> SlicetraderError {
        SlicetraderError::Persistence {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Write `bytes` to the staging file and fsync it.
    fn stage(&self, bytes: &[u8]) -> io::Result<PathBuf> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.temp_path();
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
        Ok(tmp_path)
    }

    /// Rotate the current primary into the rolling backup, then atomically
    /// rename the staged file over the primary.
    fn commit(&self, tmp_path: &Path) -> io::Result<()> {
        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, self.backup_path()) {
                warn!(path = %self.path.display(), error = %e, "could not rotate backup");
            }
        }
        if let Err(e) = fs::rename(tmp_path, &self.path) {
            let _ = fs::remove_file(tmp_path);
            return Err(e);
        }
        sync_parent_dir(&self.path);
        Ok(())
    }

    fn read_verified(path: &Path) -> Result<RunCheckpoint, String> {
        let bytes = fs::read(path).map_err(|e| e.to_string())?;
        RunCheckpoint::from_bytes(&bytes)
    }

    /// Copy the current primary to a timestamped archive.
    pub fn archive(&self) -> Result<Option<PathBuf>, SlicetraderError> {
        let _guard = self.guard();
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let target = self.sibling(format!("{}{stamp}.json", self.archive_prefix()));
        fs::copy(&self.path, &target).map_err(|e| self.persistence(e))?;
        info!(path = %target.display(), "archived state");
        Ok(Some(target))
    }

    /// Timestamped archives, newest first.
    pub fn archives(&self) -> Vec<PathBuf> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };
        let prefix = self.archive_prefix();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut found: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(".json")
            })
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.path())
            })
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        found.into_iter().map(|(_, path)| path).collect()
    }

    /// Keep the `keep` most recent archives and delete the rest. Returns the
    /// number deleted; deletion failures are logged and skipped.
    pub fn cleanup_backups(&self, keep: usize) -> usize {
        let _guard = self.guard();
        let mut removed = 0;
        for path in self.archives().into_iter().skip(keep) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed old archive");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove archive"),
            }
        }
        removed
    }

    /// Delete the primary, rolling backup and any staging file.
    pub fn clear(&self) -> Result<(), SlicetraderError> {
        let _guard = self.guard();
        for path in [self.path.clone(), self.backup_path(), self.temp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => info!(path = %path.display(), "removed state file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(self.persistence(e)),
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(path = %parent.display(), error = %e, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

impl CheckpointPort for StateStore {
    fn save(&self, checkpoint: &RunCheckpoint) -> Result<(), SlicetraderError> {
        let mut sealed = checkpoint.clone();
        let bytes = sealed.seal()?;

        let _guard = self.guard();
        let tmp_path = self.stage(&bytes).map_err(|e| self.persistence(e))?;
        self.commit(&tmp_path).map_err(|e| self.persistence(e))?;
        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            last_processed = ?checkpoint.last_processed_timestamp,
            "state saved"
        );
        Ok(())
    }

    fn load(&self) -> Option<RunCheckpoint> {
        let _guard = self.guard();
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file, starting fresh");
            return None;
        }

        let reason = match Self::read_verified(&self.path) {
            Ok(checkpoint) => return Some(checkpoint),
            Err(reason) => reason,
        };
        warn!(path = %self.path.display(), reason = %reason, "primary state file is corrupt, trying backup");

        let backup = self.backup_path();
        match Self::read_verified(&backup) {
            Ok(checkpoint) => {
                match fs::copy(&backup, &self.path) {
                    Ok(_) => info!(path = %self.path.display(), "restored primary from backup"),
                    Err(e) => warn!(path = %self.path.display(), error = %e, "could not repair primary"),
                }
                Some(checkpoint)
            }
            Err(backup_reason) => {
                let err = SlicetraderError::Corruption {
                    path: self.path.display().to_string(),
                    reason: format!("primary: {reason}; backup: {backup_reason}"),
                };
                error!(error = %err, "no usable checkpoint, starting fresh");
                None
            }
        }
    }
}
