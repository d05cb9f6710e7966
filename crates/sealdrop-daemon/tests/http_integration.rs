use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;
use tempfile::TempDir;

use sealdrop_core::UNITS_PER_WHOLE;
use sealdrop_daemon::config::DaemonConfig;
use sealdrop_daemon::distribution::DistributionService;
use sealdrop_daemon::gates::EligibilityConfig;
use sealdrop_daemon::http::{self, AppState};
use sealdrop_daemon::telemetry::Telemetry;

const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
const SEEDED: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";
const OUTSIDER: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
const TREASURY: &str = "So11111111111111111111111111111111111111112";
const OPERATOR_TOKEN: &str = "operator-token-0123456789";

struct Running {
    base: String,
    shutdown: tokio::sync::oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

async fn start(cfg_for: impl FnOnce(&TempDir) -> DaemonConfig) -> anyhow::Result<Running> {
    let tmp = TempDir::new()?;
    let cfg = cfg_for(&tmp);
    let service = DistributionService::build(&cfg, Arc::new(Telemetry::new()))?;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = AppState {
        service,
        max_body_bytes: cfg.max_body_bytes,
        operator_token: cfg.operator_token.clone(),
    };
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let _ = http::serve(listener, state, async move {
            let _ = rx.await;
        })
        .await;
    });
    Ok(Running {
        base: format!("http://{addr}"),
        shutdown: tx,
        server,
        _tmp: tmp,
    })
}

fn config(tmp: &TempDir) -> DaemonConfig {
    let allocations = tmp.path().join("allocations.json");
    std::fs::write(
        &allocations,
        json!({ "allocations": { SEEDED: 250 * UNITS_PER_WHOLE } }).to_string(),
    )
    .expect("write allocations");
    DaemonConfig {
        data_dir: tmp.path().join("data"),
        treasury_wallet: Some(TREASURY.to_string()),
        allocations_path: Some(allocations),
        rate_limit_rps: 1_000,
        operator_token: Some(OPERATOR_TOKEN.to_string()),
        eligibility: EligibilityConfig {
            allow_all: false,
            allowlist: vec![WALLET.to_string(), SEEDED.to_string()],
        },
        ..DaemonConfig::default()
    }
}

#[tokio::test]
async fn distribute_over_http_then_reject_second_claim() -> anyhow::Result<()> {
    let running = start(config).await?;
    let client = reqwest::Client::new();

    let eligibility: serde_json::Value = client
        .get(format!("{}/v1/eligibility", running.base))
        .query(&[("wallet", SEEDED)])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(eligibility, json!({"eligible": true, "reason": "allowlisted"}));

    let first = client
        .post(format!("{}/v1/distribute", running.base))
        .header("x-request-id", "req-1")
        .json(&json!({ "wallet": SEEDED }))
        .send()
        .await?;
    assert_eq!(first.status(), StatusCode::OK);
    let body: serde_json::Value = first.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["amount"], 250 * UNITS_PER_WHOLE);
    assert_eq!(body["durability"], "durable");
    let receipt = body["receipt"].as_str().unwrap_or_default().to_string();
    assert_eq!(receipt.len(), 64);

    let second = client
        .post(format!("{}/v1/distribute", running.base))
        .json(&json!({ "wallet": SEEDED }))
        .send()
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = second.json().await?;
    assert_eq!(
        body,
        json!({
            "success": false,
            "error": "ALREADY_CLAIMED",
            "reason": "already_claimed",
            "retryable": false
        })
    );

    let record: serde_json::Value = client
        .get(format!("{}/v1/claims/{SEEDED}", running.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(record["status"], "claimed");
    assert_eq!(record["receipt"], receipt.as_str());

    let missing = client
        .get(format!("{}/v1/claims/{WALLET}", running.base))
        .send()
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn ineligible_and_malformed_requests() -> anyhow::Result<()> {
    let running = start(config).await?;
    let client = reqwest::Client::new();

    let denied = client
        .post(format!("{}/v1/distribute", running.base))
        .json(&json!({ "wallet": OUTSIDER }))
        .send()
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body: serde_json::Value = denied.json().await?;
    assert_eq!(body["error"], "INELIGIBLE");
    assert_eq!(body["reason"], "not_allowlisted");

    let malformed = client
        .post(format!("{}/v1/distribute", running.base))
        .body("{not json")
        .send()
        .await?;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let bad_wallet = client
        .post(format!("{}/v1/contribute", running.base))
        .json(&json!({ "wallet": "0000", "amount": UNITS_PER_WHOLE }))
        .send()
        .await?;
    assert_eq!(bad_wallet.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = bad_wallet.json().await?;
    assert_eq!(body["error"], "INVALID_INPUT");

    let no_wallet = client
        .get(format!("{}/v1/eligibility", running.base))
        .send()
        .await?;
    assert_eq!(no_wallet.status(), StatusCode::BAD_REQUEST);

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn contribute_over_http_updates_presale_and_metrics() -> anyhow::Result<()> {
    let running = start(config).await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/contribute", running.base))
        .header("x-forwarded-for", "203.0.113.9")
        .json(&json!({ "wallet": WALLET, "amount": UNITS_PER_WHOLE }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["tokensIssued"], 55_000 * UNITS_PER_WHOLE);
    assert_eq!(body["bonusPercent"], 10);

    let below = client
        .post(format!("{}/v1/contribute", running.base))
        .json(&json!({ "wallet": WALLET, "amount": 1 }))
        .send()
        .await?;
    assert_eq!(below.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = below.json().await?;
    assert_eq!(body["reason"], "BELOW_MINIMUM");

    let presale: serde_json::Value = client
        .get(format!("{}/v1/presale", running.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(presale["total_raised"], UNITS_PER_WHOLE);
    assert_eq!(presale["contributors"], 1);
    assert_eq!(presale["active"], true);

    let metrics = client
        .get(format!("{}/metrics", running.base))
        .send()
        .await?
        .text()
        .await?;
    assert!(metrics.contains("sealdrop_requests_total{flow=\"contribute\",outcome=\"success\"} 1"));
    assert!(metrics.contains(
        "sealdrop_rejects_total{flow=\"contribute\",reason=\"BELOW_MINIMUM\"} 1"
    ));

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn state_survives_restart() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let cfg = config(&tmp);
    {
        let service = DistributionService::build(&cfg, Arc::new(Telemetry::new()))?;
        service.distribute("client", WALLET).await?;
        service.contribute("client", WALLET, 2 * UNITS_PER_WHOLE).await?;
    }

    let reopened = DistributionService::build(&cfg, Arc::new(Telemetry::new()))?;
    assert!(reopened.claims().is_claimed(WALLET));
    assert_eq!(
        reopened.claims().get(SEEDED).map(|r| r.amount),
        Some(250 * UNITS_PER_WHOLE)
    );
    assert_eq!(reopened.ledger().totals().total_raised, 2 * UNITS_PER_WHOLE);
    let spooled = std::fs::read_dir(cfg.data_dir.join("transfer_spool").join("allocation"))?.count();
    assert_eq!(spooled, 1);
    Ok(())
}

#[tokio::test]
async fn unversioned_paths_serve_the_same_handlers() -> anyhow::Result<()> {
    let running = start(config).await?;
    let client = reqwest::Client::new();

    let eligibility: serde_json::Value = client
        .get(format!("{}/eligibility", running.base))
        .query(&[("wallet", WALLET)])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(eligibility["eligible"], true);

    let claimed = client
        .post(format!("{}/distribute", running.base))
        .json(&json!({ "wallet": SEEDED }))
        .send()
        .await?;
    assert_eq!(claimed.status(), StatusCode::OK);

    let again = client
        .post(format!("{}/v1/distribute", running.base))
        .json(&json!({ "wallet": SEEDED }))
        .send()
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let contributed = client
        .post(format!("{}/contribute", running.base))
        .json(&json!({ "wallet": WALLET, "amount": UNITS_PER_WHOLE }))
        .send()
        .await?;
    assert_eq!(contributed.status(), StatusCode::OK);

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn operator_routes_require_the_bearer_token() -> anyhow::Result<()> {
    let running = start(config).await?;
    let client = reqwest::Client::new();
    let finalize = format!("{}/v1/operator/presale/finalize", running.base);

    let missing = client.post(&finalize).send().await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = missing.json().await?;
    assert_eq!(body["error"], "UNAUTHENTICATED");

    let wrong = client
        .post(&finalize)
        .bearer_auth("operator-token-wrong")
        .send()
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let whitelist = client
        .put(format!("{}/v1/operator/presale/whitelist", running.base))
        .bearer_auth(OPERATOR_TOKEN)
        .json(&json!({ "whitelist": [SEEDED] }))
        .send()
        .await?;
    assert_eq!(whitelist.status(), StatusCode::OK);
    let body: serde_json::Value = whitelist.json().await?;
    assert_eq!(body["whitelist"], json!([SEEDED]));

    let denied = client
        .post(format!("{}/v1/contribute", running.base))
        .json(&json!({ "wallet": WALLET, "amount": UNITS_PER_WHOLE }))
        .send()
        .await?;
    assert_eq!(denied.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = denied.json().await?;
    assert_eq!(body["reason"], "NOT_WHITELISTED");

    let closed = client
        .post(&finalize)
        .bearer_auth(OPERATOR_TOKEN)
        .send()
        .await?;
    assert_eq!(closed.status(), StatusCode::OK);
    let body: serde_json::Value = closed.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["totals"]["active"], false);

    let presale: serde_json::Value = client
        .get(format!("{}/v1/presale", running.base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(presale["active"], false);

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn operator_routes_are_hidden_without_a_token() -> anyhow::Result<()> {
    let running = start(|tmp| DaemonConfig {
        operator_token: None,
        ..config(tmp)
    })
    .await?;
    let resp = reqwest::Client::new()
        .post(format!("{}/v1/operator/presale/finalize", running.base))
        .bearer_auth(OPERATOR_TOKEN)
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["reason"], "operator_api_disabled");

    let _ = running.shutdown.send(());
    let _ = running.server.await;
    Ok(())
}

#[tokio::test]
async fn finalized_presale_survives_restart() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let cfg = config(&tmp);
    {
        let service = DistributionService::build(&cfg, Arc::new(Telemetry::new()))?;
        service.contribute("client", WALLET, UNITS_PER_WHOLE).await?;
        service.update_presale_whitelist(Some(vec![WALLET.to_string()]))?;
        service.finalize_presale()?;
    }

    let reopened = DistributionService::build(&cfg, Arc::new(Telemetry::new()))?;
    let status = reopened.presale_status();
    assert!(!status.active);
    assert_eq!(status.total_raised, UNITS_PER_WHOLE);
    assert_eq!(
        reopened.ledger().round().whitelist.map(|w| w.len()),
        Some(1)
    );
    let err = reopened
        .contribute("client", WALLET, UNITS_PER_WHOLE)
        .await
        .expect_err("round closed");
    assert_eq!(err.reason(), "INACTIVE");
    Ok(())
}
