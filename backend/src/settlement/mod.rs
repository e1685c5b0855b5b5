//! Settlement Module
//!
//! Applies commission credits to the external ledger and the store as one
//! unit of work ([`Posting`]).
//!
//! # Critical Invariants
//!
//! 1. **Atomicity**: wallet credits, ledger transactions and store mutations
//!    succeed together, or the credits are compensated
//! 2. **Pairing**: no wallet credit without its CommissionRecord, and vice versa
//! 3. **Exactness**: amounts are i64 cents throughout

pub mod posting;

pub use posting::{Posting, PostingReceipt, SettlementError};
