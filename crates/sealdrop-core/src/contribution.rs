//! Presale contribution accounting.
//!
//! `validate` and `quote` are read-only and work from a snapshot. `commit` is
//! the only mutation: it takes the wallet slot lock and then the global totals
//! lock (always in that order) and re-checks every cap before applying the
//! increment, so two contributions validated against the same stale snapshot
//! cannot jointly exceed a cap.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::{Durability, MemoryBackend, RecordBackend};
use crate::wallet::validate_wallet;

/// Fixed-point scale shared by the contribution currency and the token.
pub const UNITS_PER_WHOLE: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusTier {
    pub threshold_amount: u64,
    pub bonus_percent: u64,
}

pub fn default_bonus_tiers() -> Vec<BonusTier> {
    [(1, 10), (10, 15), (50, 20), (100, 25), (500, 30)]
        .into_iter()
        .map(|(whole, bonus_percent)| BonusTier {
            threshold_amount: whole * UNITS_PER_WHOLE,
            bonus_percent,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAllocation {
    pub base: u64,
    pub bonus: u64,
    pub total: u64,
    pub bonus_percent: u64,
}

/// Bonus of the highest tier whose threshold is at or below `amount`.
pub fn bonus_percent_for(amount: u64, tiers: &[BonusTier]) -> u64 {
    tiers
        .iter()
        .rev()
        .find(|tier| tier.threshold_amount <= amount)
        .map(|tier| tier.bonus_percent)
        .unwrap_or(0)
}

/// Converts a contribution into token units.
///
/// `price_per_token` is currency units per whole token, so
/// `base = amount * UNITS_PER_WHOLE / price_per_token`. `tiers` must be
/// ascending by threshold.
pub fn calculate_tokens(
    amount: u64,
    tiers: &[BonusTier],
    price_per_token: u64,
) -> LedgerResult<TokenAllocation> {
    if price_per_token == 0 {
        return Err(LedgerError::InvalidArgument(
            "price_per_token must be positive".to_string(),
        ));
    }
    let base = u128::from(amount)
        .checked_mul(u128::from(UNITS_PER_WHOLE))
        .ok_or(LedgerError::Overflow)?
        / u128::from(price_per_token);
    let bonus_percent = bonus_percent_for(amount, tiers);
    let bonus = base
        .checked_mul(u128::from(bonus_percent))
        .ok_or(LedgerError::Overflow)?
        / 100;
    let total = base.checked_add(bonus).ok_or(LedgerError::Overflow)?;
    Ok(TokenAllocation {
        base: u64::try_from(base).map_err(|_| LedgerError::Overflow)?,
        bonus: u64::try_from(bonus).map_err(|_| LedgerError::Overflow)?,
        total: u64::try_from(total).map_err(|_| LedgerError::Overflow)?,
        bonus_percent,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresaleCapConfig {
    pub min_purchase: u64,
    pub max_purchase_per_wallet: u64,
    pub global_raise_cap: u64,
    pub token_supply: u64,
    pub price_per_token: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub whitelist: Option<BTreeSet<String>>,
    pub bonus_tiers: Vec<BonusTier>,
}

impl Default for PresaleCapConfig {
    fn default() -> Self {
        Self {
            min_purchase: UNITS_PER_WHOLE / 10,
            max_purchase_per_wallet: 1_000 * UNITS_PER_WHOLE,
            global_raise_cap: 10_000 * UNITS_PER_WHOLE,
            token_supply: 500_000_000 * UNITS_PER_WHOLE,
            price_per_token: 20_000,
            start_time: 0,
            end_time: i64::MAX,
            whitelist: None,
            bonus_tiers: default_bonus_tiers(),
        }
    }
}

impl PresaleCapConfig {
    pub fn validate(&self) -> LedgerResult<()> {
        let invalid = |msg: &str| Err(LedgerError::Configuration(msg.to_string()));
        if self.end_time <= self.start_time {
            return invalid("end_time must be after start_time");
        }
        if self.min_purchase == 0 {
            return invalid("min_purchase must be positive");
        }
        if self.max_purchase_per_wallet < self.min_purchase {
            return invalid("max_purchase_per_wallet must be at least min_purchase");
        }
        if self.global_raise_cap == 0 {
            return invalid("global_raise_cap must be positive");
        }
        if self.token_supply == 0 {
            return invalid("token_supply must be positive");
        }
        if self.price_per_token == 0 {
            return invalid("price_per_token must be positive");
        }
        if self
            .bonus_tiers
            .windows(2)
            .any(|w| w[0].threshold_amount >= w[1].threshold_amount)
        {
            return invalid("bonus_tiers must be strictly ascending by threshold");
        }
        if self.bonus_tiers.iter().any(|t| t.bonus_percent > 100) {
            return invalid("bonus_percent must not exceed 100");
        }
        if let Some(whitelist) = &self.whitelist {
            for wallet in whitelist {
                validate_wallet(wallet)
                    .map_err(|_| LedgerError::Configuration(format!("bad whitelist entry {wallet}")))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Inactive,
    NotStarted,
    Ended,
    BelowMinimum,
    AboveMaxPerWallet,
    GlobalCapExceeded,
    SupplyExhausted,
    NotWhitelisted,
}

impl RejectReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::NotStarted => "NOT_STARTED",
            Self::Ended => "ENDED",
            Self::BelowMinimum => "BELOW_MINIMUM",
            Self::AboveMaxPerWallet => "ABOVE_MAX_PER_WALLET",
            Self::GlobalCapExceeded => "GLOBAL_CAP_EXCEEDED",
            Self::SupplyExhausted => "SUPPLY_EXHAUSTED",
            Self::NotWhitelisted => "NOT_WHITELISTED",
        }
    }

    pub const fn is_cap(self) -> bool {
        matches!(
            self,
            Self::AboveMaxPerWallet | Self::GlobalCapExceeded | Self::SupplyExhausted
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure admission check for one contribution against a totals snapshot.
pub fn validate(
    wallet: &str,
    amount: u64,
    config: &PresaleCapConfig,
    existing_total: u64,
    running_global_total: u64,
    now: i64,
) -> Result<(), RejectReason> {
    if now < config.start_time {
        return Err(RejectReason::NotStarted);
    }
    if now > config.end_time {
        return Err(RejectReason::Ended);
    }
    if amount < config.min_purchase {
        return Err(RejectReason::BelowMinimum);
    }
    if existing_total
        .checked_add(amount)
        .map(|total| total > config.max_purchase_per_wallet)
        .unwrap_or(true)
    {
        return Err(RejectReason::AboveMaxPerWallet);
    }
    if running_global_total
        .checked_add(amount)
        .map(|total| total > config.global_raise_cap)
        .unwrap_or(true)
    {
        return Err(RejectReason::GlobalCapExceeded);
    }
    if let Some(whitelist) = &config.whitelist {
        if !whitelist.contains(wallet) {
            return Err(RejectReason::NotWhitelisted);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub wallet: String,
    pub total_contributed: u64,
    pub total_tokens: u64,
    pub contributions: u64,
    pub first_at: i64,
    pub last_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleTotals {
    pub total_raised: u64,
    pub tokens_sold: u64,
    pub contributors: u64,
    pub active: bool,
}

/// Operator-controlled round state, persisted under [`ROUND_KEY`].
///
/// Once written it takes precedence over the configured whitelist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresaleRound {
    pub active: bool,
    pub finalized_at: Option<i64>,
    #[serde(default)]
    pub whitelist: Option<BTreeSet<String>>,
    pub updated_at: i64,
}

pub const ROUND_KEY: &str = "round";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub record: ContributionRecord,
    pub totals: PresaleTotals,
    pub durability: Durability,
}

type Slot = Arc<Mutex<Option<ContributionRecord>>>;

pub struct ContributionLedger {
    config: PresaleCapConfig,
    wallets: Mutex<HashMap<String, Slot>>,
    totals: Mutex<PresaleTotals>,
    backend: Box<dyn RecordBackend<ContributionRecord>>,
    round: Mutex<PresaleRound>,
    round_backend: Box<dyn RecordBackend<PresaleRound>>,
    degraded: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ContributionLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionLedger")
            .field("config", &self.config)
            .field("totals", &self.totals())
            .field("durability", &self.durability())
            .finish()
    }
}

impl ContributionLedger {
    pub fn in_memory(config: PresaleCapConfig, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        Self::open(config, Box::new(MemoryBackend), Box::new(MemoryBackend), clock)
    }

    /// Validates `config`, rebuilds the running totals from `backend` and
    /// restores the round state from `round_backend`.
    pub fn open(
        config: PresaleCapConfig,
        backend: Box<dyn RecordBackend<ContributionRecord>>,
        round_backend: Box<dyn RecordBackend<PresaleRound>>,
        clock: Arc<dyn Clock>,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let round = match round_backend.load_all()?.pop() {
            Some(round) => {
                for wallet in round.whitelist.iter().flatten() {
                    validate_wallet(wallet)?;
                }
                round
            }
            None => PresaleRound {
                active: true,
                finalized_at: None,
                whitelist: config.whitelist.clone(),
                updated_at: clock.now_unix(),
            },
        };
        let mut totals = PresaleTotals {
            total_raised: 0,
            tokens_sold: 0,
            contributors: 0,
            active: round.active,
        };
        let mut wallets = HashMap::new();
        for record in backend.load_all()? {
            validate_wallet(&record.wallet)?;
            totals.total_raised = totals
                .total_raised
                .checked_add(record.total_contributed)
                .ok_or(LedgerError::Overflow)?;
            totals.tokens_sold = totals
                .tokens_sold
                .checked_add(record.total_tokens)
                .ok_or(LedgerError::Overflow)?;
            totals.contributors = totals.contributors.saturating_add(1);
            wallets.insert(record.wallet.clone(), Arc::new(Mutex::new(Some(record))));
        }
        if totals.total_raised > config.global_raise_cap {
            tracing::warn!(
                total_raised = totals.total_raised,
                cap = config.global_raise_cap,
                "loaded contributions exceed the configured raise cap"
            );
        }
        tracing::info!(
            contributors = totals.contributors,
            total_raised = totals.total_raised,
            tokens_sold = totals.tokens_sold,
            active = totals.active,
            "contribution ledger opened"
        );
        Ok(Self {
            config,
            wallets: Mutex::new(wallets),
            totals: Mutex::new(totals),
            backend,
            round: Mutex::new(round),
            round_backend,
            degraded: AtomicBool::new(false),
            clock,
        })
    }

    pub fn config(&self) -> &PresaleCapConfig {
        &self.config
    }

    pub fn totals(&self) -> PresaleTotals {
        *self.totals.lock()
    }

    pub fn round(&self) -> PresaleRound {
        self.round.lock().clone()
    }

    pub fn durability(&self) -> Durability {
        if self.degraded.load(Ordering::Acquire) {
            Durability::Ephemeral
        } else {
            self.backend.durability()
        }
    }

    pub fn get(&self, wallet: &str) -> Option<ContributionRecord> {
        let slot = self.wallets.lock().get(wallet).cloned()?;
        let guard = slot.lock();
        guard.clone()
    }

    /// `(existing_total, running_global_total)` as of now.
    pub fn snapshot(&self, wallet: &str) -> (u64, u64) {
        let existing = self
            .get(wallet)
            .map(|r| r.total_contributed)
            .unwrap_or(0);
        (existing, self.totals().total_raised)
    }

    /// Read-only admission check plus pricing. Nothing is reserved.
    pub fn quote(&self, wallet: &str, amount: u64) -> LedgerResult<TokenAllocation> {
        validate_wallet(wallet)?;
        if amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }
        let totals = self.totals();
        if !totals.active {
            return Err(LedgerError::Rejected(RejectReason::Inactive));
        }
        let (existing, running_global) = self.snapshot(wallet);
        let config = PresaleCapConfig {
            whitelist: self.round.lock().whitelist.clone(),
            ..self.config.clone()
        };
        validate(
            wallet,
            amount,
            &config,
            existing,
            running_global,
            self.clock.now_unix(),
        )
        .map_err(LedgerError::Rejected)?;
        let allocation =
            calculate_tokens(amount, &self.config.bonus_tiers, self.config.price_per_token)?;
        if totals
            .tokens_sold
            .checked_add(allocation.total)
            .map(|sold| sold > self.config.token_supply)
            .unwrap_or(true)
        {
            return Err(LedgerError::Rejected(RejectReason::SupplyExhausted));
        }
        Ok(allocation)
    }

    /// Applies a contribution whose funds have already been received.
    ///
    /// Re-checks the wallet cap, the raise cap and the token supply under the
    /// wallet and global locks. A failed re-check leaves the ledger untouched.
    /// A failed write never undoes the increment; the ledger degrades to
    /// ephemeral instead.
    pub fn commit(&self, wallet: &str, amount: u64, tokens: u64) -> LedgerResult<CommitReceipt> {
        validate_wallet(wallet)?;
        if amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }
        let slot = self.slot(wallet);
        let mut wallet_guard = slot.lock();
        let mut totals = self.totals.lock();
        if !totals.active {
            return Err(LedgerError::Rejected(RejectReason::Inactive));
        }

        let existing = wallet_guard
            .as_ref()
            .map(|r| r.total_contributed)
            .unwrap_or(0);
        let wallet_total = existing.checked_add(amount).ok_or(LedgerError::Overflow)?;
        if wallet_total > self.config.max_purchase_per_wallet {
            return Err(LedgerError::Rejected(RejectReason::AboveMaxPerWallet));
        }
        let total_raised = totals
            .total_raised
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        if total_raised > self.config.global_raise_cap {
            return Err(LedgerError::Rejected(RejectReason::GlobalCapExceeded));
        }
        let tokens_sold = totals
            .tokens_sold
            .checked_add(tokens)
            .ok_or(LedgerError::Overflow)?;
        if tokens_sold > self.config.token_supply {
            return Err(LedgerError::Rejected(RejectReason::SupplyExhausted));
        }

        let now = self.clock.now_unix();
        let record = match wallet_guard.as_ref() {
            Some(existing) => ContributionRecord {
                total_contributed: wallet_total,
                total_tokens: existing.total_tokens.saturating_add(tokens),
                contributions: existing.contributions.saturating_add(1),
                last_at: now,
                ..existing.clone()
            },
            None => {
                totals.contributors = totals.contributors.saturating_add(1);
                ContributionRecord {
                    wallet: wallet.to_string(),
                    total_contributed: wallet_total,
                    total_tokens: tokens,
                    contributions: 1,
                    first_at: now,
                    last_at: now,
                }
            }
        };
        totals.total_raised = total_raised;
        totals.tokens_sold = tokens_sold;
        let totals_after = *totals;
        drop(totals);

        *wallet_guard = Some(record.clone());
        let durability = self.persist(&record);
        Ok(CommitReceipt {
            record,
            totals: totals_after,
            durability,
        })
    }

    /// Closes the round; later quotes and commits fail with `Inactive`.
    ///
    /// The round closes in memory even when the state write fails; calling
    /// again re-attempts the write.
    pub fn finalize(&self) -> LedgerResult<PresaleTotals> {
        let mut totals = self.totals.lock();
        let mut round = self.round.lock();
        if totals.active {
            totals.active = false;
            tracing::info!(
                total_raised = totals.total_raised,
                tokens_sold = totals.tokens_sold,
                contributors = totals.contributors,
                "presale finalized"
            );
        }
        let now = self.clock.now_unix();
        round.active = false;
        round.finalized_at = round.finalized_at.or(Some(now));
        round.updated_at = now;
        self.round_backend.write(ROUND_KEY, &round).map_err(|err| {
            tracing::error!(error = %err, "presale round state write failed");
            err
        })?;
        Ok(*totals)
    }

    /// Replaces the whitelist. `None` admits every wallet.
    ///
    /// The previous whitelist stays in force when the write fails.
    pub fn update_whitelist(&self, whitelist: Option<BTreeSet<String>>) -> LedgerResult<()> {
        for wallet in whitelist.iter().flatten() {
            validate_wallet(wallet)?;
        }
        let mut round = self.round.lock();
        let next = PresaleRound {
            whitelist,
            updated_at: self.clock.now_unix(),
            ..round.clone()
        };
        if let Err(err) = self.round_backend.write(ROUND_KEY, &next) {
            tracing::error!(error = %err, "presale round state write failed");
            return Err(err);
        }
        tracing::info!(
            entries = ?next.whitelist.as_ref().map(BTreeSet::len),
            "presale whitelist updated"
        );
        *round = next;
        Ok(())
    }

    fn slot(&self, wallet: &str) -> Slot {
        let mut wallets = self.wallets.lock();
        wallets
            .entry(wallet.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    fn persist(&self, record: &ContributionRecord) -> Durability {
        match self.backend.write(&record.wallet, record) {
            Ok(()) => self.durability(),
            Err(err) => {
                self.degraded.store(true, Ordering::Release);
                tracing::error!(
                    wallet = %record.wallet,
                    error = %err,
                    "contribution record write failed; ledger degraded to ephemeral"
                );
                Durability::Ephemeral
            }
        }
    }
}
