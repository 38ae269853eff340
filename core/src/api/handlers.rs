//! API Handlers
//!
//! Request handlers for the HTTP API.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::{error, info, warn};
use rand::RngCore;

use super::types::*;
use crate::ledger::{Address, LedgerError, LocalLedger, RejectReason};
use crate::settlement::{
    Orchestrator, ProverBackend, SettlementError, SplitError, TransferId, TransferRequest,
    parse_amount,
};
use crate::storage::{InstitutionRecord, InstitutionRegistry, RegistryError};

// ============================================================================
// Shared State
// ============================================================================

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator<LocalLedger, ProverBackend>,
    pub ledger: Arc<LocalLedger>,
    pub registry: Arc<dyn InstitutionRegistry>,
    pub prover: &'static str,
    pub dev_mode: bool,
    pub start_time: Instant,
}

// ============================================================================
// Errors
// ============================================================================

pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, body: ErrorResponse) -> Self {
        Self { status, body }
    }

    fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorResponse::bad_request(msg))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        let msg = err.to_string();
        match err {
            SettlementError::InvalidAmount(_) | SettlementError::LegNotRetryable { .. } => {
                Self::bad_request(msg)
            }
            SettlementError::NotFound(_)
            | SettlementError::UnknownInstitution(_)
            | SettlementError::TransferNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, ErrorResponse::not_found(msg))
            }
            SettlementError::ConfigurationError(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::configuration(msg),
            ),
            SettlementError::LedgerRejected { .. } => {
                Self::new(StatusCode::CONFLICT, ErrorResponse::ledger_rejected(msg))
            }
            SettlementError::LedgerUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::internal(msg),
            ),
            _ => {
                error!("Settlement error: {}", msg);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::internal(msg))
            }
        }
    }
}

impl From<SplitError> for ApiError {
    fn from(err: SplitError) -> Self {
        SettlementError::from(err).into()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let msg = err.to_string();
        match err {
            LedgerError::Rejected(RejectReason::UnknownInstitution(_)) => {
                Self::new(StatusCode::NOT_FOUND, ErrorResponse::not_found(msg))
            }
            LedgerError::Rejected(RejectReason::DuplicateInstitution(_)) => Self::bad_request(msg),
            LedgerError::Rejected(_) => {
                Self::new(StatusCode::CONFLICT, ErrorResponse::ledger_rejected(msg))
            }
            LedgerError::Unavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::internal(msg),
            ),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        SettlementError::from(err).into()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Health & Configuration
// ============================================================================

/// Health check endpoint
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        prover: state.prover.to_string(),
    })
}

pub async fn denominations(State(state): State<ApiState>) -> impl IntoResponse {
    let set = state.orchestrator.denominations();
    Json(DenominationsResponse {
        denominations: set.ascending(),
        complete: set.is_complete(),
    })
}

/// Preview the leg decomposition of an amount
pub async fn split(
    State(state): State<ApiState>,
    Json(req): Json<SplitRequest>,
) -> ApiResult<Json<SplitResponse>> {
    let amount = parse_amount(&req.amount)?;
    let legs = state.orchestrator.split_preview(amount)?;
    Ok(Json(SplitResponse { amount, legs }))
}

// ============================================================================
// Institutions
// ============================================================================

pub async fn register_institution(
    State(state): State<ApiState>,
    Json(req): Json<RegisterInstitutionRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.id.is_empty() {
        return Err(ApiError::bad_request("institution id must not be empty"));
    }
    if req.initial_supply > 0 && !state.dev_mode {
        return Err(ApiError::bad_request("initial supply requires dev mode"));
    }
    match state.registry.get(&req.id) {
        Ok(_) => {
            return Err(ApiError::bad_request(format!(
                "institution {} already registered",
                req.id
            )));
        }
        Err(RegistryError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let address = req.settlement_address.unwrap_or_else(|| {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Address(bytes)
    });

    state
        .ledger
        .register_institution(&req.id, address, req.initial_supply)
        .await?;

    let record = InstitutionRecord::new(&req.id, req.name, req.symbol, address);
    state.registry.put(&req.id, record.clone())?;
    info!("Registered institution {} ({})", req.id, address);

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_institution(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<InstitutionRecord>> {
    Ok(Json(state.registry.get(&id)?))
}

/// Authorise `from` to send to `to`
pub async fn connect_institutions(
    State(state): State<ApiState>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<InstitutionRecord>> {
    let mut from = state.registry.get(&req.from)?;
    state.registry.get(&req.to)?;

    state.ledger.connect(&req.from, &req.to).await?;

    if !from.is_connected_to(&req.to) {
        from.connected.push(req.to.clone());
        state.registry.put(&req.from, from.clone())?;
    }
    info!("Connected {} -> {}", req.from, req.to);
    Ok(Json(from))
}

/// Dev mode: credit an institution on the local ledger
pub async fn mint(
    State(state): State<ApiState>,
    Json(req): Json<MintRequest>,
) -> ApiResult<Json<BalanceResponse>> {
    if !state.dev_mode {
        return Err(ApiError::bad_request("minting requires dev mode"));
    }
    let balance = state.ledger.mint(&req.id, req.amount).await?;
    warn!("Dev mint of {} into {}", req.amount, req.id);
    Ok(Json(BalanceResponse {
        id: req.id,
        balance,
    }))
}

pub async fn balance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.ledger.balance(&id).await?;
    Ok(Json(BalanceResponse { id, balance }))
}

// ============================================================================
// Transfers
// ============================================================================

/// Commit a transfer. Legs settle in the background unless `wait` is set.
pub async fn create_transfer(
    State(state): State<ApiState>,
    Json(req): Json<CreateTransferRequest>,
) -> ApiResult<Response> {
    let amount = parse_amount(&req.amount)?;
    let prepared = state.orchestrator.prepare(TransferRequest {
        source: req.source,
        destination: req.destination,
        amount,
    })?;
    let id = state.orchestrator.commit(prepared).await?;

    if req.wait {
        let report = state.orchestrator.settle(&id).await?;
        return Ok((StatusCode::OK, Json(report)).into_response());
    }

    let orchestrator = state.orchestrator.clone();
    let background_id = id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.settle(&background_id).await {
            error!("Settlement of transfer {} failed: {}", background_id, e);
        }
    });

    let report = state.orchestrator.status(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(report)).into_response())
}

pub async fn list_transfers(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.list()?))
}

pub async fn get_transfer(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.orchestrator.status(&TransferId::from(id)).await?;
    Ok(Json(report))
}

/// Operator retry of one failed leg
pub async fn retry_leg(
    State(state): State<ApiState>,
    Path((id, leg)): Path<(String, usize)>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .orchestrator
        .retry_leg(&TransferId::from(id), leg)
        .await?;
    Ok(Json(report))
}
