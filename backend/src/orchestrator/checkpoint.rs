//! Checkpoint - Save/Load Engine State
//!
//! Serializes the in-memory store and ledger so that separate invocations of
//! the engine (one cron run per job) continue from the same state.
//!
//! # Critical Invariants
//!
//! - **Config Matching**: a snapshot only loads under the config it was
//!   saved with (SHA-256 of the canonical config JSON)
//! - **Tree Integrity**: the tree is re-validated node by node on load
//! - **Version**: snapshots carry a format version and unknown versions are refused

use crate::config::EngineConfig;
use crate::core::time::Clock;
use crate::ledger::{InMemoryLedger, LedgerSnapshot};
use crate::orchestrator::{CommissionEngine, EngineError};
use crate::store::{MemoryStore, StoreSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Snapshot Structures
// ============================================================================

/// Complete engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,

    /// SHA256 hash of the config in force when saved
    pub config_hash: String,

    pub saved_at: DateTime<Utc>,

    pub store: StoreSnapshot,

    pub ledger: LedgerSnapshot,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Checkpoint(format!("Snapshot serialization failed: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::Checkpoint(format!("Snapshot parse failed: {}", e)))
    }
}

// ============================================================================
// Config Hashing
// ============================================================================

/// Compute deterministic SHA256 hash of config
///
/// Object keys are sorted recursively before hashing so the result does not
/// depend on map iteration order.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, EngineError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config)
        .map_err(|e| EngineError::Checkpoint(format!("Config serialization failed: {}", e)))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let json = serde_json::to_string(&canonicalize(value))
        .map_err(|e| EngineError::Checkpoint(format!("Config serialization failed: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Engine save / restore
// ============================================================================

impl CommissionEngine<MemoryStore, InMemoryLedger> {
    /// Capture store and ledger state
    pub fn checkpoint(&self) -> Result<EngineSnapshot, EngineError> {
        let snapshot = EngineSnapshot {
            version: SNAPSHOT_VERSION,
            config_hash: compute_config_hash(self.config())?,
            saved_at: self.clock().now(),
            store: self.store().snapshot()?,
            ledger: self.ledger().snapshot()?,
        };
        info!(
            nodes = snapshot.store.nodes.len(),
            schedules = snapshot.store.schedules.len(),
            transactions = snapshot.ledger.transactions.len(),
            "Checkpoint captured"
        );
        Ok(snapshot)
    }

    /// Rebuild an engine from a snapshot saved under `config`
    pub fn restore(
        snapshot: EngineSnapshot,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(EngineError::Checkpoint(format!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        let expected = compute_config_hash(&config)?;
        if snapshot.config_hash != expected {
            return Err(EngineError::Checkpoint(
                "Config hash mismatch: snapshot was saved under a different config".to_string(),
            ));
        }

        let store = MemoryStore::from_snapshot(snapshot.store)?;
        let ledger = InMemoryLedger::from_snapshot(snapshot.ledger);
        Self::with_clock(config, store, ledger, clock)
    }
}
