//! Remote Prover Client
//!
//! HTTP client for an external withdrawal prover coordinator.
//!
//! ```text
//!   Orchestrator ── RemoteProver::prove()
//!                        │
//!                        │ POST /v1/withdraw/prove        → job_id
//!                        │ GET  /v1/withdraw/{job}/proof  → NOT_READY | proof
//!                        ▼
//!               Prover Coordinator
//! ```
//!
//! The coordinator is expected to hold the circuit and proving key already;
//! requests name them by fingerprint.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::prover::{Proof, Prover, ProverError};
use super::witness::{CircuitArtifacts, PrivateInputs, PublicInputs};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct RemoteProverConfig {
    /// Base URL of the prover coordinator (e.g., "http://localhost:8090")
    pub coordinator_url: String,
    /// Upper bound for one proof, submission to result
    pub proof_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RemoteProverConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8090".to_string(),
            proof_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawProveRequest {
    pub circuit_id: String,
    pub root: String,
    pub nullifier_hash: String,
    pub recipient: String,
    pub relayer: String,
    pub fee: u64,
    pub refund: u64,
    pub nullifier: String,
    pub secret: String,
    pub path_elements: Vec<String>,
    pub path_indices: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawProveResponse {
    pub job_id: String,
    #[serde(default)]
    pub estimated_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawProofResult {
    pub job_id: String,
    /// Hex-encoded proof bytes
    pub proof_bytes: String,
    #[serde(default)]
    pub proving_time_ms: u64,
}

/// API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ApiResponse<T> {
    Success {
        data: T,
    },
    Error {
        message: String,
        code: Option<String>,
    },
}

enum PollOutcome {
    Ready(WithdrawProofResult),
    Pending,
}

// ============================================================================
// Client
// ============================================================================

pub struct RemoteProver {
    config: RemoteProverConfig,
    client: reqwest::Client,
}

impl RemoteProver {
    pub fn new(config: RemoteProverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.proof_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { config, client })
    }

    pub fn coordinator_url(&self) -> &str {
        &self.config.coordinator_url
    }

    /// Check if the prover coordinator is healthy
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/v1/health", self.config.coordinator_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Prover coordinator health check failed: {}", e);
                false
            }
        }
    }

    fn build_request(
        &self,
        artifacts: &CircuitArtifacts,
        public: &PublicInputs,
        private: &PrivateInputs,
    ) -> WithdrawProveRequest {
        WithdrawProveRequest {
            circuit_id: artifacts.fingerprint(),
            root: hex::encode(public.root),
            nullifier_hash: hex::encode(public.nullifier_hash.as_bytes()),
            recipient: hex::encode(public.recipient.0),
            relayer: hex::encode(public.relayer.0),
            fee: public.fee,
            refund: public.refund,
            nullifier: hex::encode(private.nullifier),
            secret: hex::encode(private.secret),
            path_elements: private.path_elements.iter().map(hex::encode).collect(),
            path_indices: private.path_indices.clone(),
        }
    }

    async fn submit(&self, request: &WithdrawProveRequest) -> Result<WithdrawProveResponse, ProverError> {
        let url = format!("{}/v1/withdraw/prove", self.config.coordinator_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ProverError::Unavailable(format!("failed to reach coordinator: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProverError::Unavailable(format!(
                "coordinator returned {}: {}",
                status, body
            )));
        }

        let api_response: ApiResponse<WithdrawProveResponse> = response
            .json()
            .await
            .map_err(|e| ProverError::Unavailable(format!("unreadable coordinator response: {}", e)))?;

        match api_response {
            ApiResponse::Success { data } => Ok(data),
            ApiResponse::Error { message, code } => Err(ProverError::Rejected(format!(
                "({}) {}",
                code.unwrap_or_else(|| "unknown".to_string()),
                message
            ))),
        }
    }

    async fn poll_once(&self, job_id: &str) -> Result<PollOutcome, ProverError> {
        let url = format!("{}/v1/withdraw/{}/proof", self.config.coordinator_url, job_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProverError::Unavailable(e.to_string()))?;
        let api_response: ApiResponse<WithdrawProofResult> = response
            .json()
            .await
            .map_err(|e| ProverError::Unavailable(e.to_string()))?;

        match api_response {
            ApiResponse::Success { data } => Ok(PollOutcome::Ready(data)),
            ApiResponse::Error { code, .. } if code.as_deref() == Some("NOT_READY") => {
                Ok(PollOutcome::Pending)
            }
            ApiResponse::Error { message, code } if code.as_deref() == Some("PROOF_FAILED") => {
                Err(ProverError::Rejected(message))
            }
            ApiResponse::Error { message, .. } => Err(ProverError::Unavailable(message)),
        }
    }

    /// Poll until the job finishes. Transport errors are logged and polling
    /// continues; a failed proof ends the wait.
    async fn wait_for_proof(&self, job_id: &str) -> Result<WithdrawProofResult, ProverError> {
        let limit = self.config.proof_timeout;
        timeout(limit, async {
            loop {
                match self.poll_once(job_id).await {
                    Ok(PollOutcome::Ready(result)) => return Ok(result),
                    Ok(PollOutcome::Pending) => debug!("Proof job {} still running", job_id),
                    Err(ProverError::Rejected(message)) => {
                        return Err(ProverError::Rejected(message));
                    }
                    Err(e) => warn!("Failed to poll proof job {}: {}", job_id, e),
                }
                tokio::time::sleep(self.config.poll_interval).await;
            }
        })
        .await
        .map_err(|_| ProverError::Timeout(limit))?
    }
}

impl Prover for RemoteProver {
    async fn prove(
        &self,
        artifacts: &CircuitArtifacts,
        public: &PublicInputs,
        private: &PrivateInputs,
    ) -> Result<Proof, ProverError> {
        let start = Instant::now();
        let request = self.build_request(artifacts, public, private);

        let job = self.submit(&request).await?;
        info!(
            "Proof job {} created (estimated {}ms)",
            job.job_id, job.estimated_time_ms
        );

        let result = self.wait_for_proof(&job.job_id).await?;
        info!(
            "Proof job {} completed in {:?} (proving time: {}ms)",
            job.job_id,
            start.elapsed(),
            result.proving_time_ms
        );

        let bytes = hex::decode(&result.proof_bytes)
            .map_err(|e| ProverError::Rejected(format!("invalid proof hex: {}", e)))?;
        Ok(Proof(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    use crate::ledger::Address;
    use crate::settlement::witness::assemble_witness;
    use mintbridge_privacy::{Leaf, new_deposit};

    #[derive(Clone)]
    struct Stub {
        polls: Arc<AtomicUsize>,
        ready_after: usize,
        fail: bool,
    }

    async fn stub_prove(Json(req): Json<WithdrawProveRequest>) -> Json<ApiResponse<WithdrawProveResponse>> {
        assert_eq!(req.fee, 0);
        Json(ApiResponse::Success {
            data: WithdrawProveResponse {
                job_id: "job-1".into(),
                estimated_time_ms: 10,
            },
        })
    }

    async fn stub_proof(
        State(stub): State<Stub>,
        Path(job): Path<String>,
    ) -> Json<ApiResponse<WithdrawProofResult>> {
        let n = stub.polls.fetch_add(1, Ordering::SeqCst);
        if stub.fail {
            return Json(ApiResponse::Error {
                message: "constraint unsatisfied".into(),
                code: Some("PROOF_FAILED".into()),
            });
        }
        if n < stub.ready_after {
            return Json(ApiResponse::Error {
                message: "still proving".into(),
                code: Some("NOT_READY".into()),
            });
        }
        Json(ApiResponse::Success {
            data: WithdrawProofResult {
                job_id: job,
                proof_bytes: hex::encode([0xab; 8]),
                proving_time_ms: 5,
            },
        })
    }

    async fn spawn_stub(stub: Stub) -> String {
        let app = Router::new()
            .route("/v1/health", get(|| async { "ok" }))
            .route("/v1/withdraw/prove", post(stub_prove))
            .route("/v1/withdraw/{job}/proof", get(stub_proof))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn prover(url: String) -> RemoteProver {
        RemoteProver::new(RemoteProverConfig {
            coordinator_url: url,
            proof_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap()
    }

    fn inputs() -> (PublicInputs, PrivateInputs) {
        let deposit = new_deposit();
        let leaves = vec![Leaf::new(0, deposit.commitment())];
        let witness = assemble_witness(&deposit, Address([2; 32]), 4, &leaves).unwrap();
        (witness.public, witness.private)
    }

    #[test]
    fn test_config_default() {
        let config = RemoteProverConfig::default();
        assert_eq!(config.coordinator_url, "http://localhost:8090");
        assert_eq!(config.proof_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_build_request() {
        let (public, private) = inputs();
        let client = prover("http://localhost:1".into());
        let request = client.build_request(&CircuitArtifacts::default(), &public, &private);

        assert_eq!(request.root, hex::encode(public.root));
        assert_eq!(request.recipient, hex::encode([2u8; 32]));
        assert_eq!(request.relayer, hex::encode([0u8; 32]));
        assert_eq!(request.path_elements.len(), 4);
        assert_eq!(request.path_indices, vec![0, 0, 0, 0]);
        assert_eq!(request.nullifier.len(), 62);
    }

    #[test]
    fn test_parse_api_responses() {
        let ok: ApiResponse<WithdrawProveResponse> =
            serde_json::from_str(r#"{"status":"success","data":{"job_id":"j"}}"#).unwrap();
        assert!(matches!(ok, ApiResponse::Success { data } if data.job_id == "j"));

        let err: ApiResponse<WithdrawProofResult> = serde_json::from_str(
            r#"{"status":"error","message":"wait","code":"NOT_READY"}"#,
        )
        .unwrap();
        assert!(matches!(err, ApiResponse::Error { code: Some(c), .. } if c == "NOT_READY"));
    }

    #[tokio::test]
    async fn test_polls_until_ready() {
        let polls = Arc::new(AtomicUsize::new(0));
        let url = spawn_stub(Stub {
            polls: polls.clone(),
            ready_after: 2,
            fail: false,
        })
        .await;

        let (public, private) = inputs();
        let client = prover(url);
        assert!(client.health_check().await);

        let proof = client
            .prove(&CircuitArtifacts::default(), &public, &private)
            .await
            .unwrap();
        assert_eq!(proof, Proof(vec![0xab; 8]));
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_proof_failure_is_rejection() {
        let url = spawn_stub(Stub {
            polls: Arc::new(AtomicUsize::new(0)),
            ready_after: 0,
            fail: true,
        })
        .await;

        let (public, private) = inputs();
        let result = prover(url)
            .prove(&CircuitArtifacts::default(), &public, &private)
            .await;
        assert_eq!(
            result,
            Err(ProverError::Rejected("constraint unsatisfied".into()))
        );
    }

    #[tokio::test]
    async fn test_unreachable_coordinator() {
        let (public, private) = inputs();
        let result = prover("http://127.0.0.1:1".into())
            .prove(&CircuitArtifacts::default(), &public, &private)
            .await;
        assert!(matches!(result, Err(ProverError::Unavailable(_))));
    }
}
