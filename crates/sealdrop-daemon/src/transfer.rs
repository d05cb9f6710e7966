// Copyright (c) 2026 Sealdrop Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use sealdrop_core::clock::{Clock, SystemClock};

const SPOOL_SCHEMA: &str = "sealdrop.v1.transfer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Treasury to claimant: the airdrop allocation.
    Allocation,
    /// Contributor to treasury: presale funds in.
    Contribution,
    /// Treasury back to contributor after a commit lost a cap race.
    Refund,
}

impl TransferKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allocation => "allocation",
            Self::Contribution => "contribution",
            Self::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub wallet: String,
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("network error: {0}")]
    Network(String),
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("transfer spool failed: {0}")]
    Spool(String),
    #[error("transfer task aborted")]
    Aborted,
}

/// Moves assets on the underlying network. Opaque beyond success or failure.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn execute(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError>;
}

#[derive(Debug, Serialize)]
struct SpooledTransfer<'a> {
    schema: &'static str,
    kind: TransferKind,
    wallet: &'a str,
    destination: &'a str,
    amount: u64,
    created_at: i64,
    nonce: String,
}

/// Writes one JSON instruction per transfer for an offline signer to pick up.
///
/// The receipt is the SHA-256 of the spooled bytes, which is also the file
/// name, so a signer can report back against it.
pub struct SpoolTransferExecutor {
    dir: PathBuf,
    clock: Box<dyn Clock>,
}

impl SpoolTransferExecutor {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, TransferError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| TransferError::Spool(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            clock: Box::new(SystemClock),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TransferExecutor for SpoolTransferExecutor {
    async fn execute(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        if request.amount == 0 {
            return Err(TransferError::Rejected("zero amount".to_string()));
        }
        let mut nonce = [0_u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let payload = serde_json::to_vec_pretty(&SpooledTransfer {
            schema: SPOOL_SCHEMA,
            kind: request.kind,
            wallet: &request.wallet,
            destination: &request.destination,
            amount: request.amount,
            created_at: self.clock.now_unix(),
            nonce: hex::encode(nonce),
        })
        .map_err(|e| TransferError::Spool(e.to_string()))?;
        let signature = hex::encode(Sha256::digest(&payload));

        let kind_dir = self.dir.join(request.kind.as_str());
        tokio::fs::create_dir_all(&kind_dir)
            .await
            .map_err(|e| TransferError::Spool(e.to_string()))?;
        let path = kind_dir.join(format!("{signature}.json"));
        let tmp = kind_dir.join(format!("{signature}.json.tmp"));
        tokio::fs::write(&tmp, &payload)
            .await
            .map_err(|e| TransferError::Spool(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| TransferError::Spool(e.to_string()))?;

        tracing::info!(
            kind = request.kind.as_str(),
            wallet = %request.wallet,
            amount = request.amount,
            signature = %signature,
            "transfer spooled"
        );
        Ok(TransferReceipt { signature })
    }
}
