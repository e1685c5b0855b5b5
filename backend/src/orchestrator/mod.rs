//! Orchestrator - scheduler entrypoints over the commission components
//!
//! See `engine.rs` for the entrypoints and `checkpoint.rs` for save/resume.

pub mod checkpoint;
pub mod engine;

// Re-export main types for convenience
pub use engine::{ApprovalOutcome, CommissionEngine, EngineError};

// Re-export checkpoint types
pub use checkpoint::{compute_config_hash, EngineSnapshot, SNAPSHOT_VERSION};
