//! API Types
//!
//! Request/response types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::ledger::Address;

// ============================================================================
// Institutions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterInstitutionRequest {
    pub id: String,
    pub name: String,
    pub symbol: String,
    /// Generated when omitted
    pub settlement_address: Option<Address>,
    /// Dev mode only: opening balance on the local ledger
    #[serde(default)]
    pub initial_supply: u64,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct MintRequest {
    pub id: String,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub id: String,
    pub balance: u64,
}

// ============================================================================
// Splitting & Transfers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SplitRequest {
    pub amount: serde_json::Number,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SplitResponse {
    pub amount: u64,
    pub legs: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DenominationsResponse {
    /// Ascending
    pub denominations: Vec<u64>,
    pub complete: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub source: String,
    pub destination: String,
    pub amount: serde_json::Number,
    /// Block until every leg is terminal instead of settling in the background
    #[serde(default)]
    pub wait: bool,
}

// ============================================================================
// Health & Errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub prover: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(error, "BAD_REQUEST")
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(error, "NOT_FOUND")
    }

    pub fn configuration(error: impl Into<String>) -> Self {
        Self::new(error, "CONFIGURATION_ERROR")
    }

    pub fn ledger_rejected(error: impl Into<String>) -> Self {
        Self::new(error, "LEDGER_REJECTED")
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(error, "INTERNAL_ERROR")
    }
}
