use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// One step of a distribution or contribution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent<'a> {
    pub attempt_id: &'a str,
    pub wallet: &'a str,
    pub flow: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub amount: u64,
    pub detail: Option<&'a str>,
}

#[derive(Debug, Default)]
struct TelemetryState {
    requests_total: HashMap<(String, String), u64>,
    rejects_total: HashMap<(String, String), u64>,
    lifecycle_transitions_total: HashMap<(String, String), u64>,
    rollbacks_total: u64,
    rollback_failures_total: u64,
    refunds_total: HashMap<String, u64>,
    transfer_latency_ms_bucket: BTreeMap<u64, u64>,
    tokens_distributed_total: u64,
    contributed_total: u64,
    storage_ephemeral: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lifecycle_event(&self, event: &LifecycleEvent<'_>) {
        tracing::info!(target: "sealdrop.lifecycle", event = ?event, "attempt lifecycle transition");
        let mut guard = self.state.lock();
        let entry = guard
            .lifecycle_transitions_total
            .entry((event.flow.to_string(), event.to.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_request(&self, flow: &str, outcome: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .requests_total
            .entry((flow.to_string(), outcome.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_reject(&self, flow: &str, reason: &str) {
        let mut guard = self.state.lock();
        let entry = guard
            .rejects_total
            .entry((flow.to_string(), reason.to_string()))
            .or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_rollback(&self, succeeded: bool) {
        let mut guard = self.state.lock();
        if succeeded {
            guard.rollbacks_total = guard.rollbacks_total.saturating_add(1);
        } else {
            guard.rollback_failures_total = guard.rollback_failures_total.saturating_add(1);
        }
    }

    pub fn record_refund(&self, outcome: &str) {
        let mut guard = self.state.lock();
        let entry = guard.refunds_total.entry(outcome.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_transfer_latency_ms(&self, latency_ms: u64) {
        let mut guard = self.state.lock();
        let bucket = [10_u64, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000]
            .into_iter()
            .find(|bound| latency_ms <= *bound)
            .unwrap_or(u64::MAX);
        let entry = guard.transfer_latency_ms_bucket.entry(bucket).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn record_distributed(&self, tokens: u64) {
        let mut guard = self.state.lock();
        guard.tokens_distributed_total = guard.tokens_distributed_total.saturating_add(tokens);
    }

    pub fn record_contributed(&self, amount: u64) {
        let mut guard = self.state.lock();
        guard.contributed_total = guard.contributed_total.saturating_add(amount);
    }

    pub fn set_storage_ephemeral(&self, ledger: &str, ephemeral: bool) {
        let mut guard = self.state.lock();
        guard
            .storage_ephemeral
            .insert(ledger.to_string(), if ephemeral { 1 } else { 0 });
    }

    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE sealdrop_requests_total counter\n");
        for ((flow, outcome), value) in &guard.requests_total {
            let _ = writeln!(
                out,
                "sealdrop_requests_total{{flow=\"{}\",outcome=\"{}\"}} {}",
                flow, outcome, value
            );
        }
        out.push_str("# TYPE sealdrop_rejects_total counter\n");
        for ((flow, reason), value) in &guard.rejects_total {
            let _ = writeln!(
                out,
                "sealdrop_rejects_total{{flow=\"{}\",reason=\"{}\"}} {}",
                flow, reason, value
            );
        }
        out.push_str("# TYPE sealdrop_lifecycle_transitions_total counter\n");
        for ((flow, to), value) in &guard.lifecycle_transitions_total {
            let _ = writeln!(
                out,
                "sealdrop_lifecycle_transitions_total{{flow=\"{}\",to=\"{}\"}} {}",
                flow, to, value
            );
        }
        out.push_str("# TYPE sealdrop_rollbacks_total counter\n");
        let _ = writeln!(out, "sealdrop_rollbacks_total {}", guard.rollbacks_total);
        out.push_str("# TYPE sealdrop_rollback_failures_total counter\n");
        let _ = writeln!(
            out,
            "sealdrop_rollback_failures_total {}",
            guard.rollback_failures_total
        );
        out.push_str("# TYPE sealdrop_refunds_total counter\n");
        for (outcome, value) in &guard.refunds_total {
            let _ = writeln!(
                out,
                "sealdrop_refunds_total{{outcome=\"{}\"}} {}",
                outcome, value
            );
        }
        out.push_str("# TYPE sealdrop_transfer_latency_ms_bucket counter\n");
        for (bucket, value) in &guard.transfer_latency_ms_bucket {
            let bucket_label = if *bucket == u64::MAX {
                "+Inf".to_string()
            } else {
                bucket.to_string()
            };
            let _ = writeln!(
                out,
                "sealdrop_transfer_latency_ms_bucket{{le=\"{}\"}} {}",
                bucket_label, value
            );
        }
        out.push_str("# TYPE sealdrop_tokens_distributed_total counter\n");
        let _ = writeln!(
            out,
            "sealdrop_tokens_distributed_total {}",
            guard.tokens_distributed_total
        );
        out.push_str("# TYPE sealdrop_contributed_total counter\n");
        let _ = writeln!(out, "sealdrop_contributed_total {}", guard.contributed_total);
        out.push_str("# TYPE sealdrop_storage_ephemeral gauge\n");
        for (ledger, value) in &guard.storage_ephemeral {
            let _ = writeln!(
                out,
                "sealdrop_storage_ephemeral{{ledger=\"{}\"}} {}",
                ledger, value
            );
        }
        out
    }
}
