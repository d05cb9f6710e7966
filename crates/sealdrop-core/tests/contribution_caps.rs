use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use sealdrop_core::clock::ManualClock;
use sealdrop_core::contribution::{
    calculate_tokens, default_bonus_tiers, ContributionLedger, ContributionRecord,
    PresaleCapConfig, PresaleRound, RejectReason, UNITS_PER_WHOLE,
};
use sealdrop_core::error::LedgerError;
use sealdrop_core::storage::JsonDirBackend;
use tempfile::TempDir;

const THREADS: usize = 32;

fn wallet(i: usize) -> String {
    format!("{}{:z>8}", "1".repeat(24), i.to_string().replace('0', "z"))
}

fn config(cap_whole: u64, per_wallet_whole: u64) -> PresaleCapConfig {
    PresaleCapConfig {
        min_purchase: UNITS_PER_WHOLE / 10,
        max_purchase_per_wallet: per_wallet_whole * UNITS_PER_WHOLE,
        global_raise_cap: cap_whole * UNITS_PER_WHOLE,
        start_time: 0,
        end_time: 10_000,
        ..PresaleCapConfig::default()
    }
}

#[test]
fn two_commits_that_jointly_exceed_the_raise_cap_admit_one() {
    let ledger = Arc::new(
        ContributionLedger::in_memory(config(10, 10), Arc::new(ManualClock::new(100)))
            .expect("ledger"),
    );
    let amount = 6 * UNITS_PER_WHOLE;
    let a = wallet(1);
    let b = wallet(2);
    // both validate against the same empty snapshot
    let qa = ledger.quote(&a, amount).expect("quote a");
    let qb = ledger.quote(&b, amount).expect("quote b");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [(a, qa.total), (b, qb.total)]
        .into_iter()
        .map(|(w, tokens)| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ledger.commit(&w, amount, tokens)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LedgerError::Rejected(RejectReason::GlobalCapExceeded))
    )));
    assert_eq!(ledger.totals().total_raised, amount);
}

#[test]
fn commit_storm_never_exceeds_global_cap() {
    let ledger = Arc::new(
        ContributionLedger::in_memory(config(50, 5), Arc::new(ManualClock::new(100)))
            .expect("ledger"),
    );
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let w = wallet(i);
                barrier.wait();
                let mut accepted = 0_u64;
                for _ in 0..4 {
                    if ledger.commit(&w, 2 * UNITS_PER_WHOLE, 1).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();
    let accepted: u64 = handles.into_iter().map(|h| h.join().expect("join")).sum();

    let totals = ledger.totals();
    assert!(totals.total_raised <= 50 * UNITS_PER_WHOLE);
    assert_eq!(totals.total_raised, accepted * 2 * UNITS_PER_WHOLE);
    for i in 0..THREADS {
        if let Some(record) = ledger.get(&wallet(i)) {
            assert!(record.total_contributed <= 5 * UNITS_PER_WHOLE);
        }
    }
}

#[test]
fn same_wallet_concurrent_commits_respect_wallet_cap() {
    let ledger = Arc::new(
        ContributionLedger::in_memory(config(1_000, 3), Arc::new(ManualClock::new(100)))
            .expect("ledger"),
    );
    let w = wallet(7);
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            let w = w.clone();
            thread::spawn(move || {
                barrier.wait();
                ledger.commit(&w, UNITS_PER_WHOLE, 1).is_ok()
            })
        })
        .collect();
    let ok = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|ok| *ok)
        .count();
    assert_eq!(ok, 3);
    assert_eq!(
        ledger.get(&w).expect("record").total_contributed,
        3 * UNITS_PER_WHOLE
    );
}

fn open_on_disk(root: &Path, cfg: PresaleCapConfig) -> ContributionLedger {
    ContributionLedger::open(
        cfg,
        Box::new(JsonDirBackend::<ContributionRecord>::open(root.join("contributions")).expect("backend")),
        Box::new(JsonDirBackend::<PresaleRound>::open(root.join("presale")).expect("round backend")),
        Arc::new(ManualClock::new(100)),
    )
    .expect("open")
}

#[test]
fn totals_are_rebuilt_from_disk() {
    let tmp = TempDir::new().expect("tmp");
    {
        let ledger = open_on_disk(tmp.path(), config(100, 10));
        ledger.commit(&wallet(1), UNITS_PER_WHOLE, 10).expect("commit");
        ledger.commit(&wallet(2), 2 * UNITS_PER_WHOLE, 20).expect("commit");
    }
    let ledger = open_on_disk(tmp.path(), config(100, 10));
    let totals = ledger.totals();
    assert_eq!(totals.total_raised, 3 * UNITS_PER_WHOLE);
    assert_eq!(totals.tokens_sold, 30);
    assert_eq!(totals.contributors, 2);
    assert!(totals.active);
}

#[test]
fn finalized_round_stays_closed_after_reopen() {
    let tmp = TempDir::new().expect("tmp");
    {
        let ledger = open_on_disk(tmp.path(), config(100, 10));
        ledger.commit(&wallet(1), UNITS_PER_WHOLE, 10).expect("commit");
        let totals = ledger.finalize().expect("finalize");
        assert!(!totals.active);
    }
    let ledger = open_on_disk(tmp.path(), config(100, 10));
    assert!(!ledger.totals().active);
    assert_eq!(ledger.round().finalized_at, Some(100));
    assert_eq!(
        ledger.quote(&wallet(2), UNITS_PER_WHOLE),
        Err(LedgerError::Rejected(RejectReason::Inactive))
    );
    assert_eq!(
        ledger.commit(&wallet(2), UNITS_PER_WHOLE, 1),
        Err(LedgerError::Rejected(RejectReason::Inactive))
    );
    assert_eq!(ledger.totals().total_raised, UNITS_PER_WHOLE);
}

#[test]
fn updated_whitelist_survives_reopen() {
    let tmp = TempDir::new().expect("tmp");
    {
        let ledger = open_on_disk(tmp.path(), config(100, 10));
        ledger
            .update_whitelist(Some(BTreeSet::from([wallet(1)])))
            .expect("update");
    }
    let ledger = open_on_disk(tmp.path(), config(100, 10));
    assert!(ledger.totals().active);
    assert!(ledger.quote(&wallet(1), UNITS_PER_WHOLE).is_ok());
    assert_eq!(
        ledger.quote(&wallet(2), UNITS_PER_WHOLE),
        Err(LedgerError::Rejected(RejectReason::NotWhitelisted))
    );
}

proptest! {
    #[test]
    fn allocation_parts_are_consistent(amount in 1_u64..5_000 * UNITS_PER_WHOLE, price in 1_000_u64..10_000_000) {
        let tiers = default_bonus_tiers();
        let alloc = calculate_tokens(amount, &tiers, price).expect("allocation");
        prop_assert_eq!(alloc.total, alloc.base + alloc.bonus);
        prop_assert_eq!(alloc.bonus, alloc.base * alloc.bonus_percent / 100);
        prop_assert!(tiers.iter().any(|t| t.bonus_percent == alloc.bonus_percent) || alloc.bonus_percent == 0);
    }

    #[test]
    fn bonus_percent_is_monotonic_in_amount(a in 0_u64..1_000 * UNITS_PER_WHOLE, b in 0_u64..1_000 * UNITS_PER_WHOLE) {
        let tiers = default_bonus_tiers();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let lo_pct = calculate_tokens(lo, &tiers, 20_000).expect("lo").bonus_percent;
        let hi_pct = calculate_tokens(hi, &tiers, 20_000).expect("hi").bonus_percent;
        prop_assert!(lo_pct <= hi_pct);
    }
}
