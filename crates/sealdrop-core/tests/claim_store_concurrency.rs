use std::sync::{Arc, Barrier};
use std::thread;

use sealdrop_core::claim_store::{ClaimAttempt, ClaimRecord, ClaimStatus, ClaimStore};
use sealdrop_core::clock::{Clock, ManualClock};
use sealdrop_core::storage::{JsonDirBackend, PersistFailurePolicy};
use tempfile::TempDir;

const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
const THREADS: usize = 64;

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(1_700_000_000))
}

fn wallet(i: usize) -> String {
    // 32 base58 chars; digits map to themselves except 0 -> z
    format!("{}{:z>8}", "1".repeat(24), i.to_string().replace('0', "z"))
}

#[test]
fn concurrent_try_claim_has_exactly_one_winner() {
    let store = Arc::new(ClaimStore::in_memory(clock()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let proposed =
                    ClaimRecord::new(WALLET, 1_000, ClaimStatus::Reserved, false, 1_700_000_000);
                barrier.wait();
                store.try_claim(WALLET, proposed).expect("try_claim")
            })
        })
        .collect();

    let outcomes: Vec<ClaimAttempt> = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .collect();
    let winners = outcomes.iter().filter(|o| o.won()).count();
    assert_eq!(winners, 1);
    assert_eq!(outcomes.len() - winners, THREADS - 1);
    assert!(store.is_claimed(WALLET));
}

#[test]
fn concurrent_claims_on_distinct_wallets_all_win() {
    let store = Arc::new(ClaimStore::in_memory(clock()));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let wallet = wallet(i);
                let proposed =
                    ClaimRecord::new(&wallet, 1_000, ClaimStatus::Reserved, false, 1_700_000_000);
                barrier.wait();
                store.try_claim(&wallet, proposed).expect("try_claim").won()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().expect("join"));
    }
    assert_eq!(store.claimed_count(), THREADS);
}

#[test]
fn rollback_racing_claims_never_double_claims() {
    let store = Arc::new(ClaimStore::in_memory(clock()));
    let proposed = ClaimRecord::new(WALLET, 1_000, ClaimStatus::Reserved, false, 1_700_000_000);
    assert!(store.try_claim(WALLET, proposed.clone()).expect("claim").won());
    store
        .update_status(WALLET, ClaimStatus::Reserved)
        .expect("rollback");

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let proposed = proposed.clone();
            thread::spawn(move || {
                barrier.wait();
                store.try_claim(WALLET, proposed).expect("try_claim").won()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().expect("join"))
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn claimed_status_survives_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let dir = tmp.path().join("claims");
    let record_id = {
        let store = ClaimStore::open(
            Box::new(JsonDirBackend::open(&dir).expect("backend")),
            PersistFailurePolicy::Reject,
            clock(),
        )
        .expect("open");
        let proposed =
            ClaimRecord::new(WALLET, 1_000, ClaimStatus::Reserved, true, 1_700_000_000);
        let ClaimAttempt::Won { record, durability } =
            store.try_claim(WALLET, proposed).expect("claim")
        else {
            panic!("fresh wallet must win");
        };
        assert_eq!(durability, sealdrop_core::Durability::Durable);
        store.finalize(WALLET, "sig123").expect("finalize");
        record.id
    };

    let reopened = ClaimStore::open(
        Box::new(JsonDirBackend::open(&dir).expect("backend")),
        PersistFailurePolicy::Reject,
        clock(),
    )
    .expect("reopen");
    let record = reopened.get(WALLET).expect("record persisted");
    assert_eq!(record.status, ClaimStatus::Claimed);
    assert_eq!(record.id, record_id);
    assert_eq!(record.receipt.as_deref(), Some("sig123"));
    let again = ClaimRecord::new(WALLET, 1_000, ClaimStatus::Reserved, true, 1_700_000_001);
    assert_eq!(
        reopened.try_claim(WALLET, again).expect("try_claim"),
        ClaimAttempt::AlreadyClaimed
    );
}
