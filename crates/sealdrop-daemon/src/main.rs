// Copyright (c) 2026 Sealdrop Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sealdrop_daemon::config::DaemonConfig;
use sealdrop_daemon::distribution::DistributionService;
use sealdrop_daemon::http::{bind_listener, serve, AppState};
use sealdrop_daemon::telemetry::Telemetry;

#[derive(Debug, Parser)]
#[command(name = "sealdrop-daemon")]
#[command(about = "Airdrop claim and presale contribution service")]
struct Args {
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,

    /// Overrides `data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON config file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log))
        .init();

    let mut cfg = DaemonConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(data_dir) = args.data_dir {
        cfg.data_dir = data_dir;
    }

    let telemetry = Arc::new(Telemetry::new());
    let service = DistributionService::build(&cfg, telemetry)?;
    let listener = bind_listener(&cfg.listen).await?;

    tracing::info!(
        listen = %cfg.listen,
        data_dir = %cfg.data_dir.display(),
        claims = service.claims().len(),
        operator_api = cfg.operator_token.is_some(),
        "starting sealdrop daemon"
    );

    let state = AppState {
        service,
        max_body_bytes: cfg.max_body_bytes,
        operator_token: cfg.operator_token.clone(),
    };
    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await?;

    Ok(())
}
