//! Checkpoint file and configuration loading

use crate::lease::CheckpointLease;
use anyhow::{bail, Context, Result};
use chrono::Duration;
use mlm_commission_core::config::EngineConfig;
use mlm_commission_core::core::time::SystemClock;
use mlm_commission_core::ledger::InMemoryLedger;
use mlm_commission_core::models::MemberId;
use mlm_commission_core::orchestrator::{CommissionEngine, EngineSnapshot};
use mlm_commission_core::store::MemoryStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub type Engine = CommissionEngine<MemoryStore, InMemoryLedger>;

/// The checkpoint on disk plus the config it is bound to
///
/// Anything that writes the checkpoint goes through a [`CheckpointLease`]
/// held from load to save, so concurrent runs never overwrite each other.
pub struct StateFile {
    path: PathBuf,
    config: EngineConfig,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>, config_path: Option<&str>) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            config: load_config(config_path)?,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Take the checkpoint lease; `None` while another run holds it
    pub fn lock(&self) -> Result<Option<CheckpointLease>> {
        let ttl = Duration::seconds(i64::try_from(self.config.lock_ttl_secs).unwrap_or(i64::MAX));
        CheckpointLease::try_acquire(&self.lock_path(), ttl)
    }

    /// Start a fresh tree with `root` seated and its wallet open
    pub fn create(&self, root: MemberId, force: bool, lease: &CheckpointLease) -> Result<Engine> {
        if self.path.exists() && !force {
            bail!(
                "Checkpoint {} already exists (use --force to overwrite)",
                self.path.display()
            );
        }
        let engine = CommissionEngine::with_clock(
            self.config.clone(),
            MemoryStore::new(),
            InMemoryLedger::new(),
            Arc::new(SystemClock),
        )?;
        engine.ledger().open_wallet(&root)?;
        engine.place_member(root, None)?;
        self.save(&engine, lease)?;
        Ok(engine)
    }

    /// Load the checkpoint for a run that will save it back
    pub fn load(&self, lease: &CheckpointLease) -> Result<Engine> {
        lease.ensure_held()?;
        self.read()
    }

    /// Load the checkpoint without taking ownership (read-only commands)
    pub fn read(&self) -> Result<Engine> {
        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint {}", self.path.display()))?;
        let snapshot = EngineSnapshot::from_json(&json)?;
        debug!(path = %self.path.display(), saved_at = %snapshot.saved_at, "Checkpoint loaded");
        let engine = CommissionEngine::restore(snapshot, self.config.clone(), Arc::new(SystemClock))
            .with_context(|| format!("Failed to restore checkpoint {}", self.path.display()))?;
        Ok(engine)
    }

    /// Write the checkpoint through a temporary file
    pub fn save(&self, engine: &Engine, lease: &CheckpointLease) -> Result<()> {
        let json = engine.checkpoint()?.to_json()?;
        lease.ensure_held()?;
        let tmp = self.sibling(".tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace checkpoint {}", self.path.display()))?;
        info!(path = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let path = Path::new(path);
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlm_commission_core::models::ClubType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    const SAMPLE: &str = include_str!("../../config/commission.toml");

    #[test]
    fn test_sample_config_parses_and_validates() {
        let config: EngineConfig = toml::from_str(SAMPLE).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.reward_tiers.len(), 2);
        assert_eq!(config.reward_tiers[0].leg_weights, [40, 30, 20, 10]);
        assert_eq!(config.royalty_tiers[0].club, ClubType::Star);
        assert_eq!(config.working_ids.min_level_two, 25);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    fn state_file(dir: &tempfile::TempDir) -> StateFile {
        StateFile::new(dir.path().join("state.json"), None).unwrap()
    }

    #[test]
    fn test_create_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = state_file(&dir);
        let lease = file.lock().unwrap().unwrap();

        file.create(MemberId::from("ROOT"), false, &lease).unwrap();
        assert!(file.create(MemberId::from("ROOT"), false, &lease).is_err());

        let engine = file.load(&lease).unwrap();
        assert_eq!(engine.ledger().balance(&MemberId::from("ROOT")).unwrap(), Some(0));
    }

    #[test]
    fn test_concurrent_run_waits_for_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let first = state_file(&dir);
        let second = state_file(&dir);
        let lease = first.lock().unwrap().unwrap();
        first.create(MemberId::from("ROOT"), false, &lease).unwrap();

        let engine = first.load(&lease).unwrap();
        assert!(second.lock().unwrap().is_none());
        engine.ledger().open_wallet(&MemberId::from("B")).unwrap();
        first.save(&engine, &lease).unwrap();
        drop(lease);

        // The next run sees the first run's changes instead of overwriting them
        let lease = second.lock().unwrap().unwrap();
        let engine = second.load(&lease).unwrap();
        assert_eq!(engine.ledger().balance(&MemberId::from("B")).unwrap(), Some(0));
    }

    #[test]
    fn test_simultaneous_runs_one_holds_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let setup = state_file(&dir);
        let lease = setup.lock().unwrap().unwrap();
        setup.create(MemberId::from("ROOT"), false, &lease).unwrap();
        drop(lease);

        let start = Barrier::new(2);
        let done = Barrier::new(2);
        let held = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    let file = state_file(&dir);
                    start.wait();
                    let lease = file.lock().unwrap();
                    if let Some(lease) = &lease {
                        file.load(lease).unwrap();
                        held.fetch_add(1, Ordering::SeqCst);
                    }
                    done.wait();
                });
            }
        });

        assert_eq!(held.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_save_refused_after_lease_lost() {
        let dir = tempfile::tempdir().unwrap();
        let file = state_file(&dir);
        let lease = file.lock().unwrap().unwrap();
        let engine = file.create(MemberId::from("ROOT"), false, &lease).unwrap();

        fs::remove_file(file.lock_path()).unwrap();
        let other = file.lock().unwrap().unwrap();

        assert!(file.save(&engine, &lease).is_err());
        assert!(other.ensure_held().is_ok());
    }
}
