//! Checkpoint lease
//!
//! A run owns the checkpoint from load to save by holding `<state>.lock`,
//! created with `create_new` so only one process can hold it. The file records
//! the holder's token and an expiry; an expired lease (a crashed run) may be
//! taken over. Dropping the lease removes the file if it is still ours.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ACQUIRE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    token: Uuid,
    pid: u32,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Exclusive hold on a checkpoint file
#[derive(Debug)]
pub struct CheckpointLease {
    path: PathBuf,
    token: Uuid,
}

impl CheckpointLease {
    /// Take the lease at `path`, or `None` while another run holds it
    pub fn try_acquire(path: &Path, ttl: Duration) -> Result<Option<Self>> {
        for _ in 0..ACQUIRE_ATTEMPTS {
            let now = Utc::now();
            let record = LeaseRecord {
                token: Uuid::new_v4(),
                pid: std::process::id(),
                acquired_at: now,
                expires_at: now + ttl,
            };

            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(serde_json::to_string(&record)?.as_bytes())
                        .and_then(|_| file.sync_all())
                        .with_context(|| format!("Failed to write lease {}", path.display()))?;
                    debug!(path = %path.display(), token = %record.token, "Checkpoint lease acquired");
                    return Ok(Some(Self {
                        path: path.to_path_buf(),
                        token: record.token,
                    }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match holder_expiry(path, ttl)? {
                        // Released between our attempt and the read
                        None => continue,
                        Some(expires_at) if expires_at > now => {
                            debug!(path = %path.display(), %expires_at, "Checkpoint lease held");
                            return Ok(None);
                        }
                        Some(expires_at) => {
                            info!(path = %path.display(), %expires_at, "Taking over expired checkpoint lease");
                            remove_stale(path)?;
                        }
                    }
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create lease {}", path.display()))
                }
            }
        }
        Ok(None)
    }

    /// Fail unless the lease file still carries this lease's token
    pub fn ensure_held(&self) -> Result<()> {
        match read_record(&self.path)? {
            Some(record) if record.token == self.token => Ok(()),
            _ => bail!(
                "Checkpoint lease {} was lost (expired and taken over)",
                self.path.display()
            ),
        }
    }
}

impl Drop for CheckpointLease {
    fn drop(&mut self) {
        match read_record(&self.path) {
            Ok(Some(record)) if record.token == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to release checkpoint lease");
                }
            }
            Ok(_) => warn!(path = %self.path.display(), "Checkpoint lease already taken over"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to read checkpoint lease"),
        }
    }
}

/// Parsed lease file; `None` if the file is gone or not yet written out
fn read_record(path: &Path) -> Result<Option<LeaseRecord>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read lease {}", path.display())),
    }
}

/// Expiry of the current holder; `None` if the lease file has disappeared.
/// A file that does not parse expires `ttl` after its last modification.
fn holder_expiry(path: &Path, ttl: Duration) -> Result<Option<DateTime<Utc>>> {
    if let Some(record) = read_record(path)? {
        return Ok(Some(record.expires_at));
    }
    match fs::metadata(path) {
        Ok(meta) => {
            let modified: DateTime<Utc> = meta
                .modified()
                .with_context(|| format!("Failed to stat lease {}", path.display()))?
                .into();
            Ok(Some(modified + ttl))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to stat lease {}", path.display())),
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove stale lease {}", path.display())),
    }
}
