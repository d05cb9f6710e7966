// Copyright (c) 2026 Sealdrop Contributors
// SPDX-License-Identifier: Apache-2.0

//! sealdrop-core
//!
//! The distribution ledger behind the sealdrop airdrop and presale service.
//!
//! This crate implements the ledger invariants:
//! - Claim store: at most one successful claim per wallet, with rollback to
//!   `Reserved` when the downstream transfer fails
//! - Contribution ledger: per-wallet and global raise caps plus token supply,
//!   re-checked inside a single critical section at commit time
//! - Tiered bonus pricing for contributions
//! - Record persistence that reports whether a write is durable or ephemeral

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod claim_store;
pub mod clock;
pub mod contribution;
pub mod error;
pub mod storage;
pub mod wallet;

pub use crate::claim_store::{ClaimAttempt, ClaimRecord, ClaimStatus, ClaimStore};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::contribution::{
    calculate_tokens, BonusTier, ContributionLedger, ContributionRecord, PresaleCapConfig,
    PresaleRound, RejectReason, TokenAllocation, UNITS_PER_WHOLE,
};
pub use crate::error::{LedgerError, LedgerResult};
pub use crate::storage::{Durability, JsonDirBackend, MemoryBackend, PersistFailurePolicy};
