pub mod denomination;
pub mod error;
pub mod orchestrator;
pub mod prover;
pub mod remote_prover;
pub mod retry;
pub mod state;
pub mod witness;

pub use denomination::{DenominationSet, SplitError, parse_amount};
pub use error::SettlementError;
pub use orchestrator::{
    Leg, Orchestrator, OrchestratorConfig, PreparedTransfer, TransferRequest,
};
pub use prover::{MockProver, Proof, Prover, ProverBackend, ProverError};
pub use remote_prover::{RemoteProver, RemoteProverConfig};
pub use retry::RetryPolicy;
pub use state::{
    FailureKind, FailureReason, LegReport, LegState, SettlementReport, TransferId,
    TransferRecord, TransferState,
};
pub use witness::{
    CircuitArtifacts, PrivateInputs, ProofBundle, PublicInputs, WitnessAssembler, WitnessError,
};

#[cfg(test)]
mod tests;
