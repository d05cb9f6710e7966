// Copyright (c) 2026 Sealdrop Contributors
// SPDX-License-Identifier: Apache-2.0

//! Orchestrates one-time claims and presale contributions.
//!
//! A claim is linearized by `ClaimStore::try_claim`; everything before it is
//! a pure rejection. The transfer and its resolution (finalize or rollback
//! for claims, commit or refund for contributions) run inside a spawned task
//! that owns clones of the service handles, so a caller that stops waiting
//! never leaves a wallet stuck in `Claimed` after a failed transfer.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use sealdrop_core::claim_store::{ClaimAttempt, ClaimRecord, ClaimStatus, ClaimStore};
use sealdrop_core::clock::{Clock, SystemClock};
use sealdrop_core::contribution::{
    ContributionLedger, ContributionRecord, PresaleRound, PresaleTotals, RejectReason,
};
use sealdrop_core::error::LedgerError;
use sealdrop_core::storage::{Durability, JsonDirBackend};
use sealdrop_core::wallet::validate_wallet;

use crate::config::{load_allocations, DaemonConfig};
use crate::gates::{
    Eligibility, EligibilityGate, FixedWindowRateLimiter, RateLimiter, StaticEligibilityGate,
};
use crate::public_error::PublicErrorCode;
use crate::telemetry::{LifecycleEvent, Telemetry};
use crate::transfer::{
    SpoolTransferExecutor, TransferError, TransferExecutor, TransferKind, TransferReceipt,
    TransferRequest,
};

const FLOW_DISTRIBUTE: &str = "distribute";
const FLOW_CONTRIBUTE: &str = "contribute";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("rate limited")]
    RateLimited,
    #[error("wallet not eligible: {reason}")]
    Ineligible { reason: String },
    #[error("allocation already claimed")]
    AlreadyClaimed,
    #[error("contribution rejected: {0}")]
    CapExceeded(RejectReason),
    #[error("transfer failed: {reason}")]
    TransferFailed { reason: String, retryable: bool },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DistributionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::TransferFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn public_code(&self) -> PublicErrorCode {
        match self {
            Self::Validation(_) => PublicErrorCode::InvalidInput,
            Self::RateLimited => PublicErrorCode::RateLimited,
            Self::Ineligible { .. } => PublicErrorCode::Ineligible,
            Self::AlreadyClaimed => PublicErrorCode::AlreadyClaimed,
            Self::CapExceeded(reason) if reason.is_cap() => PublicErrorCode::CapExceeded,
            Self::CapExceeded(_) => PublicErrorCode::FailedPrecondition,
            Self::TransferFailed { .. } => PublicErrorCode::TransferFailed,
            Self::Configuration(_) => PublicErrorCode::Unavailable,
            Self::Internal(_) => PublicErrorCode::Internal,
        }
    }

    /// Short machine-readable detail for clients.
    pub fn reason(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::RateLimited => "too_many_requests".to_string(),
            Self::Ineligible { reason } => reason.clone(),
            Self::AlreadyClaimed => "already_claimed".to_string(),
            Self::CapExceeded(reason) => reason.as_str().to_string(),
            Self::TransferFailed { reason, .. } => reason.clone(),
            Self::Configuration(_) => "service_misconfigured".to_string(),
            Self::Internal(_) => "internal".to_string(),
        }
    }
}

impl From<LedgerError> for DistributionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidArgument(msg) => Self::Validation(msg),
            LedgerError::Rejected(reason) => Self::CapExceeded(reason),
            LedgerError::Overflow => Self::Validation("amount out of range".to_string()),
            LedgerError::Configuration(msg) => Self::Configuration(msg),
            LedgerError::NotFound(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

/// Steps an attempt moves through. Claims use the first six, contributions
/// use `Init`, `Quoted`, `Funded` and one of the last three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    Init,
    EligibilityChecked,
    Reserved,
    Claimed,
    Executed,
    RolledBack,
    Quoted,
    Funded,
    Committed,
    Refunded,
    Failed,
}

impl AttemptPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::EligibilityChecked => "eligibility_checked",
            Self::Reserved => "reserved",
            Self::Claimed => "claimed",
            Self::Executed => "executed",
            Self::RolledBack => "rolled_back",
            Self::Quoted => "quoted",
            Self::Funded => "funded",
            Self::Committed => "committed",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }
}

struct Attempt {
    id: String,
    wallet: String,
    flow: &'static str,
    amount: u64,
    telemetry: Arc<Telemetry>,
}

impl Attempt {
    fn new(flow: &'static str, wallet: &str, amount: u64, telemetry: Arc<Telemetry>) -> Self {
        Self {
            id: hex::encode(rand::random::<[u8; 8]>()),
            wallet: wallet.to_string(),
            flow,
            amount,
            telemetry,
        }
    }

    fn step(&self, from: AttemptPhase, to: AttemptPhase, detail: Option<&str>) {
        self.telemetry.lifecycle_event(&LifecycleEvent {
            attempt_id: &self.id,
            wallet: &self.wallet,
            flow: self.flow,
            from: from.as_str(),
            to: to.as_str(),
            amount: self.amount,
            detail,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DistributionReceipt {
    pub attempt_id: String,
    pub record_id: String,
    pub wallet: String,
    pub amount: u64,
    pub receipt: String,
    pub durability: Durability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContributionReceipt {
    pub attempt_id: String,
    pub wallet: String,
    pub amount: u64,
    pub tokens_issued: u64,
    pub bonus_percent: u64,
    pub receipt: String,
    pub durability: Durability,
    pub totals: PresaleTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresaleStatus {
    pub total_raised: u64,
    pub tokens_sold: u64,
    pub contributors: u64,
    pub active: bool,
    pub start_time: i64,
    pub end_time: i64,
    pub price_per_token: u64,
    pub min_purchase: u64,
    pub max_purchase_per_wallet: u64,
    pub global_raise_cap: u64,
    pub token_supply: u64,
    pub claimed_wallets: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSettings {
    pub treasury_wallet: String,
    pub default_allocation: u64,
    pub require_eligibility_proof: bool,
}

/// Everything a [`DistributionService`] is assembled from.
pub struct ServiceParts {
    pub claims: Arc<ClaimStore>,
    pub ledger: Arc<ContributionLedger>,
    pub gate: Arc<dyn EligibilityGate>,
    pub limiter: Arc<dyn RateLimiter>,
    pub executor: Arc<dyn TransferExecutor>,
    pub telemetry: Arc<Telemetry>,
    pub clock: Arc<dyn Clock>,
    pub settings: DistributionSettings,
}

#[derive(Clone)]
pub struct DistributionService {
    claims: Arc<ClaimStore>,
    ledger: Arc<ContributionLedger>,
    gate: Arc<dyn EligibilityGate>,
    limiter: Arc<dyn RateLimiter>,
    executor: Arc<dyn TransferExecutor>,
    telemetry: Arc<Telemetry>,
    clock: Arc<dyn Clock>,
    settings: Arc<DistributionSettings>,
}

impl DistributionService {
    pub fn new(parts: ServiceParts) -> Result<Self, DistributionError> {
        validate_wallet(&parts.settings.treasury_wallet)
            .map_err(|e| DistributionError::Configuration(format!("treasury wallet: {e}")))?;
        parts
            .telemetry
            .set_storage_ephemeral("claims", parts.claims.durability() == Durability::Ephemeral);
        parts.telemetry.set_storage_ephemeral(
            "contributions",
            parts.ledger.durability() == Durability::Ephemeral,
        );
        Ok(Self {
            claims: parts.claims,
            ledger: parts.ledger,
            gate: parts.gate,
            limiter: parts.limiter,
            executor: parts.executor,
            telemetry: parts.telemetry,
            clock: parts.clock,
            settings: Arc::new(parts.settings),
        })
    }

    /// Opens the ledgers under `cfg.data_dir`, seeds allocations and wires
    /// the reference gate, limiter and spool executor.
    pub fn build(cfg: &DaemonConfig, telemetry: Arc<Telemetry>) -> Result<Self, DistributionError> {
        cfg.validate()
            .map_err(|e| DistributionError::Configuration(e.to_string()))?;
        let treasury_wallet = cfg
            .treasury_wallet
            .clone()
            .ok_or_else(|| DistributionError::Configuration("treasury wallet missing".into()))?;
        let root = cfg.data_dir.as_path();
        std::fs::create_dir_all(root).map_err(|e| {
            DistributionError::Configuration(format!("create {}: {e}", root.display()))
        })?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let claims = ClaimStore::open(
            Box::new(JsonDirBackend::<ClaimRecord>::open(root.join("claims"))?),
            cfg.persist_failure_policy,
            Arc::clone(&clock),
        )?;
        if let Some(path) = cfg.allocations_path.as_deref() {
            seed_allocations(&claims, path, cfg.require_eligibility_proof, clock.now_unix())?;
        }
        let ledger = ContributionLedger::open(
            cfg.presale.clone(),
            Box::new(JsonDirBackend::<ContributionRecord>::open(
                root.join("contributions"),
            )?),
            Box::new(JsonDirBackend::<PresaleRound>::open(root.join("presale"))?),
            Arc::clone(&clock),
        )?;
        let executor = SpoolTransferExecutor::open(root.join("transfer_spool"))
            .map_err(|e| DistributionError::Configuration(e.to_string()))?;

        Self::new(ServiceParts {
            claims: Arc::new(claims),
            ledger: Arc::new(ledger),
            gate: Arc::new(StaticEligibilityGate::new(&cfg.eligibility)),
            limiter: Arc::new(FixedWindowRateLimiter::per_second(cfg.rate_limit_rps)),
            executor: Arc::new(executor),
            telemetry,
            clock,
            settings: DistributionSettings {
                treasury_wallet,
                default_allocation: cfg.default_allocation,
                require_eligibility_proof: cfg.require_eligibility_proof,
            },
        })
    }

    pub fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    pub fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// One-time allocation transfer to `wallet`.
    pub async fn distribute(
        &self,
        identity: &str,
        wallet: &str,
    ) -> Result<DistributionReceipt, DistributionError> {
        let outcome = self.distribute_inner(identity, wallet).await;
        self.record_outcome(FLOW_DISTRIBUTE, &outcome);
        outcome
    }

    async fn distribute_inner(
        &self,
        identity: &str,
        wallet: &str,
    ) -> Result<DistributionReceipt, DistributionError> {
        self.admit(identity, wallet)?;
        if self.claims.is_claimed(wallet) {
            return Err(DistributionError::AlreadyClaimed);
        }

        let existing = self.claims.get(wallet);
        let amount = existing
            .as_ref()
            .map(|r| r.amount)
            .unwrap_or(self.settings.default_allocation);
        let attempt = Attempt::new(FLOW_DISTRIBUTE, wallet, amount, Arc::clone(&self.telemetry));

        let eligibility = match self.gate.is_eligible(wallet).await {
            Ok(eligibility) => eligibility,
            Err(err) => {
                tracing::warn!(wallet, attempt_id = %attempt.id, error = %err, "eligibility gate failed");
                Eligibility::ineligible("gate_unavailable")
            }
        };
        if !eligibility.eligible {
            return Err(DistributionError::Ineligible {
                reason: eligibility.reason,
            });
        }
        attempt.step(
            AttemptPhase::Init,
            AttemptPhase::EligibilityChecked,
            Some(&eligibility.reason),
        );
        if amount == 0 {
            return Err(DistributionError::Ineligible {
                reason: "no_allocation".to_string(),
            });
        }

        let now = self.clock.now_unix();
        let proposed = ClaimRecord::new(
            wallet,
            amount,
            ClaimStatus::Reserved,
            self.settings.require_eligibility_proof,
            now,
        );
        if existing.map(|r| r.status) != Some(ClaimStatus::Reserved) {
            match self.claims.save(proposed.clone()) {
                Ok(_) => {}
                Err(LedgerError::InvalidTransition { .. }) => {
                    return Err(DistributionError::AlreadyClaimed)
                }
                Err(err) => return Err(err.into()),
            }
        }
        attempt.step(AttemptPhase::EligibilityChecked, AttemptPhase::Reserved, None);

        let record = match self.claims.try_claim(wallet, proposed)? {
            ClaimAttempt::Won { record, durability } => {
                if durability == Durability::Ephemeral {
                    self.telemetry.set_storage_ephemeral("claims", true);
                }
                record
            }
            ClaimAttempt::AlreadyClaimed => return Err(DistributionError::AlreadyClaimed),
        };
        attempt.step(AttemptPhase::Reserved, AttemptPhase::Claimed, None);

        let svc = self.clone();
        tokio::spawn(async move { svc.resolve_claim(attempt, record).await })
            .await
            .map_err(|e| DistributionError::Internal(format!("claim resolution task: {e}")))?
    }

    async fn resolve_claim(
        &self,
        attempt: Attempt,
        record: ClaimRecord,
    ) -> Result<DistributionReceipt, DistributionError> {
        let request = TransferRequest {
            kind: TransferKind::Allocation,
            wallet: record.wallet.clone(),
            destination: record.wallet.clone(),
            amount: record.amount,
        };
        match self.run_transfer(request).await {
            Ok(receipt) => {
                let durability = match self.claims.finalize(&record.wallet, &receipt.signature) {
                    Ok(_) => self.claims.durability(),
                    Err(err) => {
                        tracing::error!(
                            wallet = %record.wallet,
                            attempt_id = %attempt.id,
                            receipt = %receipt.signature,
                            error = %err,
                            "transfer succeeded but receipt was not recorded"
                        );
                        Durability::Ephemeral
                    }
                };
                attempt.step(
                    AttemptPhase::Claimed,
                    AttemptPhase::Executed,
                    Some(&receipt.signature),
                );
                tracing::info!(
                    target: "sealdrop.audit",
                    attempt_id = %attempt.id,
                    record_id = %record.id,
                    wallet = %record.wallet,
                    amount = record.amount,
                    receipt = %receipt.signature,
                    "allocation distributed"
                );
                self.telemetry.record_distributed(record.amount);
                Ok(DistributionReceipt {
                    attempt_id: attempt.id,
                    record_id: record.id,
                    wallet: record.wallet,
                    amount: record.amount,
                    receipt: receipt.signature,
                    durability,
                })
            }
            Err(transfer_err) => match self.claims.update_status(&record.wallet, ClaimStatus::Reserved)
            {
                Ok(durability) => {
                    if durability == Durability::Ephemeral {
                        self.telemetry.set_storage_ephemeral("claims", true);
                    }
                    self.telemetry.record_rollback(true);
                    let detail = transfer_err.to_string();
                    attempt.step(AttemptPhase::Claimed, AttemptPhase::RolledBack, Some(&detail));
                    Err(DistributionError::TransferFailed {
                        reason: detail,
                        retryable: true,
                    })
                }
                Err(rollback_err) => {
                    self.telemetry.record_rollback(false);
                    tracing::error!(
                        wallet = %record.wallet,
                        attempt_id = %attempt.id,
                        transfer_error = %transfer_err,
                        error = %rollback_err,
                        "rollback after failed transfer did not persist"
                    );
                    Err(DistributionError::TransferFailed {
                        reason: transfer_err.to_string(),
                        retryable: false,
                    })
                }
            },
        }
    }

    /// Presale purchase of `amount` currency units by `wallet`.
    pub async fn contribute(
        &self,
        identity: &str,
        wallet: &str,
        amount: u64,
    ) -> Result<ContributionReceipt, DistributionError> {
        let outcome = self.contribute_inner(identity, wallet, amount).await;
        self.record_outcome(FLOW_CONTRIBUTE, &outcome);
        outcome
    }

    async fn contribute_inner(
        &self,
        identity: &str,
        wallet: &str,
        amount: u64,
    ) -> Result<ContributionReceipt, DistributionError> {
        self.admit(identity, wallet)?;
        if amount == 0 {
            return Err(DistributionError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        let attempt = Attempt::new(FLOW_CONTRIBUTE, wallet, amount, Arc::clone(&self.telemetry));
        let allocation = self.ledger.quote(wallet, amount)?;
        attempt.step(AttemptPhase::Init, AttemptPhase::Quoted, None);

        let svc = self.clone();
        tokio::spawn(async move {
            let funds_in = TransferRequest {
                kind: TransferKind::Contribution,
                wallet: attempt.wallet.clone(),
                destination: svc.settings.treasury_wallet.clone(),
                amount: attempt.amount,
            };
            let receipt = match svc.run_transfer(funds_in).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    let detail = err.to_string();
                    attempt.step(AttemptPhase::Quoted, AttemptPhase::Failed, Some(&detail));
                    return Err(DistributionError::TransferFailed {
                        reason: detail,
                        retryable: true,
                    });
                }
            };
            attempt.step(
                AttemptPhase::Quoted,
                AttemptPhase::Funded,
                Some(&receipt.signature),
            );
            svc.settle_contribution(attempt, allocation.total, allocation.bonus_percent, receipt)
                .await
        })
        .await
        .map_err(|e| DistributionError::Internal(format!("contribution task: {e}")))?
    }

    async fn settle_contribution(
        &self,
        attempt: Attempt,
        tokens: u64,
        bonus_percent: u64,
        receipt: TransferReceipt,
    ) -> Result<ContributionReceipt, DistributionError> {
        let commit_err = match self.ledger.commit(&attempt.wallet, attempt.amount, tokens) {
            Ok(committed) => {
                if committed.durability == Durability::Ephemeral {
                    self.telemetry.set_storage_ephemeral("contributions", true);
                }
                attempt.step(AttemptPhase::Funded, AttemptPhase::Committed, None);
                tracing::info!(
                    target: "sealdrop.audit",
                    attempt_id = %attempt.id,
                    wallet = %attempt.wallet,
                    amount = attempt.amount,
                    tokens,
                    receipt = %receipt.signature,
                    "contribution committed"
                );
                self.telemetry.record_contributed(attempt.amount);
                return Ok(ContributionReceipt {
                    attempt_id: attempt.id,
                    wallet: attempt.wallet,
                    amount: attempt.amount,
                    tokens_issued: tokens,
                    bonus_percent,
                    receipt: receipt.signature,
                    durability: committed.durability,
                    totals: committed.totals,
                });
            }
            Err(err) => err,
        };

        tracing::warn!(
            wallet = %attempt.wallet,
            attempt_id = %attempt.id,
            error = %commit_err,
            "funded contribution failed to commit; refunding"
        );
        let refund = TransferRequest {
            kind: TransferKind::Refund,
            wallet: attempt.wallet.clone(),
            destination: attempt.wallet.clone(),
            amount: attempt.amount,
        };
        match self.run_transfer(refund).await {
            Ok(refund_receipt) => {
                self.telemetry.record_refund("issued");
                attempt.step(
                    AttemptPhase::Funded,
                    AttemptPhase::Refunded,
                    Some(&refund_receipt.signature),
                );
                Err(commit_err.into())
            }
            Err(refund_err) => {
                self.telemetry.record_refund("failed");
                attempt.step(AttemptPhase::Funded, AttemptPhase::Failed, None);
                tracing::error!(
                    target: "sealdrop.audit",
                    attempt_id = %attempt.id,
                    wallet = %attempt.wallet,
                    amount = attempt.amount,
                    funds_receipt = %receipt.signature,
                    error = %refund_err,
                    "refund failed; contribution requires manual reconciliation"
                );
                Err(DistributionError::TransferFailed {
                    reason: format!("refund failed: {refund_err}"),
                    retryable: false,
                })
            }
        }
    }

    /// Eligibility as reported by the gate, without claiming anything.
    pub async fn eligibility(&self, wallet: &str) -> Result<Eligibility, DistributionError> {
        validate_wallet(wallet).map_err(|e| DistributionError::Validation(e.to_string()))?;
        match self.gate.is_eligible(wallet).await {
            Ok(eligibility) => Ok(eligibility),
            Err(err) => {
                tracing::warn!(wallet, error = %err, "eligibility gate failed");
                Ok(Eligibility::ineligible("gate_unavailable"))
            }
        }
    }

    pub fn claim_status(&self, wallet: &str) -> Result<Option<ClaimRecord>, DistributionError> {
        validate_wallet(wallet).map_err(|e| DistributionError::Validation(e.to_string()))?;
        Ok(self.claims.get(wallet))
    }

    pub fn presale_status(&self) -> PresaleStatus {
        let totals = self.ledger.totals();
        let cfg = self.ledger.config();
        PresaleStatus {
            total_raised: totals.total_raised,
            tokens_sold: totals.tokens_sold,
            contributors: totals.contributors,
            active: totals.active,
            start_time: cfg.start_time,
            end_time: cfg.end_time,
            price_per_token: cfg.price_per_token,
            min_purchase: cfg.min_purchase,
            max_purchase_per_wallet: cfg.max_purchase_per_wallet,
            global_raise_cap: cfg.global_raise_cap,
            token_supply: cfg.token_supply,
            claimed_wallets: self.claims.claimed_count(),
        }
    }

    /// Closes the presale round. Later contributions fail with `INACTIVE`.
    pub fn finalize_presale(&self) -> Result<PresaleTotals, DistributionError> {
        let totals = self.ledger.finalize()?;
        tracing::info!(
            target: "sealdrop.audit",
            total_raised = totals.total_raised,
            tokens_sold = totals.tokens_sold,
            contributors = totals.contributors,
            "presale closed"
        );
        Ok(totals)
    }

    /// Replaces the presale whitelist; `None` opens the round to every wallet.
    pub fn update_presale_whitelist(
        &self,
        whitelist: Option<Vec<String>>,
    ) -> Result<PresaleRound, DistributionError> {
        let whitelist = whitelist.map(|wallets| wallets.into_iter().collect::<BTreeSet<_>>());
        self.ledger.update_whitelist(whitelist)?;
        let round = self.ledger.round();
        tracing::info!(
            target: "sealdrop.audit",
            entries = ?round.whitelist.as_ref().map(BTreeSet::len),
            "presale whitelist replaced"
        );
        Ok(round)
    }

    fn admit(&self, identity: &str, wallet: &str) -> Result<(), DistributionError> {
        if !self.limiter.allow(identity) {
            return Err(DistributionError::RateLimited);
        }
        validate_wallet(wallet).map_err(|e| DistributionError::Validation(e.to_string()))
    }

    /// Runs the executor in its own task so a panicking executor surfaces as
    /// a failed transfer instead of unwinding through resolution.
    async fn run_transfer(&self, request: TransferRequest) -> Result<TransferReceipt, TransferError> {
        let executor = Arc::clone(&self.executor);
        let started = Instant::now();
        let outcome = tokio::spawn(async move { executor.execute(&request).await })
            .await
            .unwrap_or(Err(TransferError::Aborted));
        self.telemetry
            .record_transfer_latency_ms(started.elapsed().as_millis() as u64);
        outcome
    }

    fn record_outcome<T>(&self, flow: &str, outcome: &Result<T, DistributionError>) {
        match outcome {
            Ok(_) => self.telemetry.record_request(flow, "success"),
            Err(err) => {
                self.telemetry.record_request(flow, err.public_code().as_str());
                self.telemetry.record_reject(flow, &err.reason());
            }
        }
    }
}

fn seed_allocations(
    claims: &ClaimStore,
    path: &Path,
    require_eligibility_proof: bool,
    now: i64,
) -> Result<(), DistributionError> {
    let allocations =
        load_allocations(path).map_err(|e| DistributionError::Configuration(e.to_string()))?;
    let mut seeded = 0_usize;
    for (wallet, amount) in allocations {
        if claims.get(&wallet).is_some() {
            continue;
        }
        claims.save(ClaimRecord::new(
            &wallet,
            amount,
            ClaimStatus::Unclaimed,
            require_eligibility_proof,
            now,
        ))?;
        seeded += 1;
    }
    tracing::info!(seeded, path = %path.display(), "allocations seeded");
    Ok(())
}
