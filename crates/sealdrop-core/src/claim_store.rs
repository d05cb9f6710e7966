//! Single-winner claim ledger keyed by wallet address.
//!
//! Every wallet owns one slot guarded by its own mutex. The slot map lock is
//! only held long enough to find or create a slot, so operations on distinct
//! wallets never wait on each other. All status transitions for a wallet run
//! under its slot lock, which makes `try_claim` a compare-and-swap rather than
//! a read followed by a write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{Durability, MemoryBackend, PersistFailurePolicy, RecordBackend};
use crate::wallet::validate_wallet;

const DOMAIN_CLAIM_RECORD_ID: &[u8] = b"sealdrop:claim_record_id:v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Unclaimed,
    Reserved,
    Claimed,
}

impl ClaimStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Reserved => "reserved",
            Self::Claimed => "claimed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub wallet: String,
    pub amount: u64,
    pub status: ClaimStatus,
    pub requires_eligibility_proof: bool,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    #[serde(default)]
    pub receipt: Option<String>,
}

impl ClaimRecord {
    /// A fresh record with a newly minted id.
    pub fn new(
        wallet: &str,
        amount: u64,
        status: ClaimStatus,
        requires_eligibility_proof: bool,
        created_at: i64,
    ) -> Self {
        Self {
            id: new_record_id(wallet, created_at),
            wallet: wallet.to_string(),
            amount,
            status,
            requires_eligibility_proof,
            created_at,
            claimed_at: None,
            receipt: None,
        }
    }
}

/// Opaque record id: domain-separated hash of wallet, creation time and a
/// random nonce.
pub fn new_record_id(wallet: &str, created_at: i64) -> String {
    let mut nonce = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut h = Sha256::new();
    h.update(DOMAIN_CLAIM_RECORD_ID);
    h.update((wallet.len() as u32).to_be_bytes());
    h.update(wallet.as_bytes());
    h.update(created_at.to_be_bytes());
    h.update(nonce);
    hex::encode(&h.finalize()[..16])
}

/// Result of [`ClaimStore::try_claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimAttempt {
    Won {
        record: ClaimRecord,
        durability: Durability,
    },
    AlreadyClaimed,
}

impl ClaimAttempt {
    pub fn won(&self) -> bool {
        matches!(self, Self::Won { .. })
    }
}

type Slot = Arc<Mutex<Option<ClaimRecord>>>;

pub struct ClaimStore {
    slots: Mutex<HashMap<String, Slot>>,
    backend: Box<dyn RecordBackend<ClaimRecord>>,
    policy: PersistFailurePolicy,
    degraded: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClaimStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimStore")
            .field("records", &self.len())
            .field("policy", &self.policy)
            .field("durability", &self.durability())
            .finish()
    }
}

impl ClaimStore {
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            backend: Box::new(MemoryBackend),
            policy: PersistFailurePolicy::Reject,
            degraded: AtomicBool::new(false),
            clock,
        }
    }

    /// Builds a store over `backend`, loading every record it already holds.
    pub fn open(
        backend: Box<dyn RecordBackend<ClaimRecord>>,
        policy: PersistFailurePolicy,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        let mut slots = HashMap::new();
        for record in backend.load_all()? {
            validate_wallet(&record.wallet)?;
            slots.insert(record.wallet.clone(), Arc::new(Mutex::new(Some(record))));
        }
        tracing::info!(
            records = slots.len(),
            durability = ?backend.durability(),
            "claim store opened"
        );
        Ok(Self {
            slots: Mutex::new(slots),
            backend,
            policy,
            degraded: AtomicBool::new(false),
            clock,
        })
    }

    /// Durability of writes made from now on.
    pub fn durability(&self) -> Durability {
        if self.degraded.load(Ordering::Acquire) {
            Durability::Ephemeral
        } else {
            self.backend.durability()
        }
    }

    /// Number of wallets holding a record.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn claimed_count(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .as_ref()
                    .map(|r| r.status == ClaimStatus::Claimed)
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn get(&self, wallet: &str) -> Option<ClaimRecord> {
        let slot = self.existing_slot(wallet)?;
        let guard = slot.lock();
        guard.clone()
    }

    pub fn is_claimed(&self, wallet: &str) -> bool {
        self.get(wallet)
            .map(|r| r.status == ClaimStatus::Claimed)
            .unwrap_or(false)
    }

    /// Installs `proposed` as Claimed unless the wallet is already Claimed.
    ///
    /// An existing record keeps its `id` and `created_at`. On a durable write
    /// failure under [`PersistFailurePolicy::Reject`] the slot is restored
    /// and the error returned, so no claim is recorded.
    pub fn try_claim(&self, wallet: &str, proposed: ClaimRecord) -> LedgerResult<ClaimAttempt> {
        validate_wallet(wallet)?;
        if proposed.wallet != wallet {
            return Err(LedgerError::InvalidArgument(
                "proposed record wallet does not match".to_string(),
            ));
        }
        let slot = self.slot(wallet);
        let mut guard = slot.lock();
        if matches!(guard.as_ref(), Some(existing) if existing.status == ClaimStatus::Claimed) {
            return Ok(ClaimAttempt::AlreadyClaimed);
        }

        let previous = guard.clone();
        let mut record = proposed;
        if let Some(existing) = previous.as_ref() {
            record.id = existing.id.clone();
            record.created_at = existing.created_at;
        }
        record.status = ClaimStatus::Claimed;
        record.claimed_at = Some(self.clock.now_unix());
        record.receipt = None;
        *guard = Some(record.clone());

        match self.persist(&record) {
            Ok(durability) => Ok(ClaimAttempt::Won { record, durability }),
            Err(err) => {
                *guard = previous;
                Err(err)
            }
        }
    }

    /// Moves a record to `status`. Only `Reserved` is a real target here;
    /// setting a status the record already has is a no-op, and nothing moves
    /// to `Claimed` except through [`ClaimStore::try_claim`].
    ///
    /// A rollback whose write fails keeps `Reserved` in memory under every
    /// policy, marks the store degraded and reports [`Durability::Ephemeral`].
    pub fn update_status(&self, wallet: &str, status: ClaimStatus) -> LedgerResult<Durability> {
        let slot = self
            .existing_slot(wallet)
            .ok_or_else(|| LedgerError::NotFound(wallet.to_string()))?;
        let mut guard = slot.lock();
        let current = guard
            .as_ref()
            .ok_or_else(|| LedgerError::NotFound(wallet.to_string()))?;

        match (current.status, status) {
            (_, ClaimStatus::Claimed) => {
                return Err(LedgerError::InvalidTransition {
                    from: current.status,
                    to: status,
                })
            }
            (from, to) if from == to => return Ok(self.durability()),
            (from, ClaimStatus::Unclaimed) => {
                return Err(LedgerError::InvalidTransition { from, to: status })
            }
            _ => {}
        }

        let mut record = current.clone();
        record.status = status;
        record.claimed_at = None;
        record.receipt = None;
        *guard = Some(record.clone());
        match self.backend.write(&record.wallet, &record) {
            Ok(()) => Ok(self.durability()),
            Err(err) => {
                // The transfer already failed, so Claimed is never restored.
                self.mark_degraded(&record.wallet, &err);
                Ok(Durability::Ephemeral)
            }
        }
    }

    /// Creates or refreshes a not-yet-claimed record.
    pub fn save(&self, record: ClaimRecord) -> LedgerResult<Durability> {
        validate_wallet(&record.wallet)?;
        if record.status == ClaimStatus::Claimed {
            return Err(LedgerError::InvalidTransition {
                from: ClaimStatus::Unclaimed,
                to: ClaimStatus::Claimed,
            });
        }
        let slot = self.slot(&record.wallet);
        let mut guard = slot.lock();
        let previous = guard.clone();
        let mut record = record;
        if let Some(existing) = previous.as_ref() {
            if existing.status == ClaimStatus::Claimed {
                return Err(LedgerError::InvalidTransition {
                    from: existing.status,
                    to: record.status,
                });
            }
            record.id = existing.id.clone();
            record.created_at = existing.created_at;
        }
        record.claimed_at = None;
        record.receipt = None;
        *guard = Some(record.clone());
        match self.persist(&record) {
            Ok(durability) => Ok(durability),
            Err(err) => {
                *guard = previous;
                Err(err)
            }
        }
    }

    /// Attaches the transfer receipt to a Claimed record.
    pub fn finalize(&self, wallet: &str, receipt: &str) -> LedgerResult<ClaimRecord> {
        let slot = self
            .existing_slot(wallet)
            .ok_or_else(|| LedgerError::NotFound(wallet.to_string()))?;
        let mut guard = slot.lock();
        let current = guard
            .as_ref()
            .ok_or_else(|| LedgerError::NotFound(wallet.to_string()))?;
        if current.status != ClaimStatus::Claimed {
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to: ClaimStatus::Claimed,
            });
        }
        let previous = guard.clone();
        let mut record = current.clone();
        record.receipt = Some(receipt.to_string());
        *guard = Some(record.clone());
        match self.persist(&record) {
            Ok(_) => Ok(record),
            Err(err) => {
                *guard = previous;
                Err(err)
            }
        }
    }

    fn slot(&self, wallet: &str) -> Slot {
        let mut slots = self.slots.lock();
        slots
            .entry(wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn existing_slot(&self, wallet: &str) -> Option<Slot> {
        self.slots.lock().get(wallet).cloned()
    }

    fn persist(&self, record: &ClaimRecord) -> LedgerResult<Durability> {
        match self.backend.write(&record.wallet, record) {
            Ok(()) => Ok(self.durability()),
            Err(err) => match self.policy {
                PersistFailurePolicy::Reject => {
                    tracing::error!(wallet = %record.wallet, error = %err, "claim record write failed");
                    Err(err)
                }
                PersistFailurePolicy::DegradeToEphemeral => {
                    self.mark_degraded(&record.wallet, &err);
                    Ok(Durability::Ephemeral)
                }
            },
        }
    }

    fn mark_degraded(&self, wallet: &str, err: &LedgerError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                wallet = %wallet,
                error = %err,
                "claim store degraded to ephemeral; records held for this process lifetime only"
            );
        }
    }
}
