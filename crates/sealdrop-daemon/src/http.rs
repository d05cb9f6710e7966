use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use sealdrop_core::contribution::PresaleTotals;
use sealdrop_core::storage::Durability;

use crate::distribution::{DistributionError, DistributionService};
use crate::public_error::PublicErrorCode;

#[derive(Clone)]
pub struct AppState {
    pub service: DistributionService,
    pub max_body_bytes: usize,
    /// Operator routes answer 404 when unset.
    pub operator_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributeRequest {
    pub wallet: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributeRequest {
    pub wallet: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EligibilityQuery {
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhitelistRequest {
    pub whitelist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FinalizeResponse {
    pub success: bool,
    pub totals: PresaleTotals,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WhitelistResponse {
    pub success: bool,
    pub whitelist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DistributeResponse {
    pub success: bool,
    pub receipt: String,
    pub record_id: String,
    pub amount: u64,
    pub durability: Durability,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContributeResponse {
    pub success: bool,
    pub tokens_issued: u64,
    pub bonus_percent: u64,
    pub receipt: String,
    pub durability: Durability,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub reason: String,
    pub retryable: bool,
}

impl ErrorResponse {
    fn from_error(err: &DistributionError) -> (StatusCode, Self) {
        let code = err.public_code();
        (
            code.http_status(),
            Self {
                success: false,
                error: code.as_str().to_string(),
                reason: err.reason(),
                retryable: err.is_retryable(),
            },
        )
    }

    fn rejected(code: PublicErrorCode, reason: &str) -> (StatusCode, Self) {
        (
            code.http_status(),
            Self {
                success: false,
                error: code.as_str().to_string(),
                reason: reason.to_string(),
                retryable: false,
            },
        )
    }

    fn invalid_input(reason: impl Into<String>) -> (StatusCode, Self) {
        (
            StatusCode::BAD_REQUEST,
            Self {
                success: false,
                error: PublicErrorCode::InvalidInput.as_str().to_string(),
                reason: reason.into(),
                retryable: false,
            },
        )
    }
}

fn error_response((status, body): (StatusCode, ErrorResponse)) -> Response {
    (status, Json(body)).into_response()
}

pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/v1/distribute", post(distribute))
        .route("/v1/contribute", post(contribute))
        .route("/v1/eligibility", get(eligibility))
        .route("/distribute", post(distribute))
        .route("/contribute", post(contribute))
        .route("/eligibility", get(eligibility))
        .route("/v1/claims/:wallet", get(claim_status))
        .route("/v1/presale", get(presale_status))
        .route("/v1/operator/presale/finalize", post(finalize_presale))
        .route("/v1/operator/presale/whitelist", put(update_whitelist))
        .route("/metrics", get(metrics))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener, std::io::Error> {
    let socket: SocketAddr = match addr.parse() {
        Ok(v) => v,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid listen address",
            ))
        }
    };
    tokio::net::TcpListener::bind(socket).await
}

/// Rate-limit identity: first `x-forwarded-for` hop, else `x-request-id`.
pub fn request_identity(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|hop| hop.trim().to_string()))
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-request-id"))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Checks `Authorization: Bearer <token>` against the configured operator
/// token by sha256 digest.
fn authorize_operator(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.operator_token.as_deref() else {
        return Err(error_response(ErrorResponse::rejected(
            PublicErrorCode::NotFound,
            "operator_api_disabled",
        )));
    };
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if Sha256::digest(token.as_bytes()) == Sha256::digest(expected.as_bytes()) => {
            Ok(())
        }
        Some(_) => Err(error_response(ErrorResponse::rejected(
            PublicErrorCode::Unauthenticated,
            "invalid_bearer_token",
        ))),
        None => Err(error_response(ErrorResponse::rejected(
            PublicErrorCode::Unauthenticated,
            "missing_authorization",
        ))),
    }
}

async fn distribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let req: DistributeRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return error_response(ErrorResponse::invalid_input("malformed request body")),
    };
    let identity = request_identity(&headers);
    match state.service.distribute(&identity, &req.wallet).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(DistributeResponse {
                success: true,
                receipt: receipt.receipt,
                record_id: receipt.record_id,
                amount: receipt.amount,
                durability: receipt.durability,
            }),
        )
            .into_response(),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn contribute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let req: ContributeRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return error_response(ErrorResponse::invalid_input("malformed request body")),
    };
    let identity = request_identity(&headers);
    match state
        .service
        .contribute(&identity, &req.wallet, req.amount)
        .await
    {
        Ok(receipt) => (
            StatusCode::OK,
            Json(ContributeResponse {
                success: true,
                tokens_issued: receipt.tokens_issued,
                bonus_percent: receipt.bonus_percent,
                receipt: receipt.receipt,
                durability: receipt.durability,
            }),
        )
            .into_response(),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn eligibility(
    State(state): State<AppState>,
    Query(query): Query<EligibilityQuery>,
) -> Response {
    let Some(wallet) = query.wallet else {
        return error_response(ErrorResponse::invalid_input("wallet is required"));
    };
    match state.service.eligibility(&wallet).await {
        Ok(eligibility) => (StatusCode::OK, Json(eligibility)).into_response(),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn claim_status(State(state): State<AppState>, Path(wallet): Path<String>) -> Response {
    match state.service.claim_status(&wallet) {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => error_response((
            StatusCode::NOT_FOUND,
            ErrorResponse {
                success: false,
                error: PublicErrorCode::NotFound.as_str().to_string(),
                reason: "no_claim_record".to_string(),
                retryable: false,
            },
        )),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn presale_status(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.service.presale_status())).into_response()
}

async fn finalize_presale(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize_operator(&state, &headers) {
        return denied;
    }
    match state.service.finalize_presale() {
        Ok(totals) => (
            StatusCode::OK,
            Json(FinalizeResponse {
                success: true,
                totals,
            }),
        )
            .into_response(),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn update_whitelist(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if let Err(denied) = authorize_operator(&state, &headers) {
        return denied;
    }
    let req: WhitelistRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return error_response(ErrorResponse::invalid_input("malformed request body")),
    };
    match state.service.update_presale_whitelist(req.whitelist) {
        Ok(round) => (
            StatusCode::OK,
            Json(WhitelistResponse {
                success: true,
                whitelist: round.whitelist.map(|w| w.into_iter().collect()),
            }),
        )
            .into_response(),
        Err(err) => error_response(ErrorResponse::from_error(&err)),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.telemetry().render(),
    )
        .into_response()
}
