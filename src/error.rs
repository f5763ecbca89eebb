use std::path::PathBuf;
use std::sync::Arc;

use solana_client::client_error::ClientError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

use crate::circuit::{CircuitKind, CircuitStatus};
use crate::executor::ExecutionFailure;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Circuit not registered: {0}")]
    UnknownCircuit(String),

    #[error("Circuit {kind} is not ready ({status})")]
    CircuitNotReady { kind: CircuitKind, status: CircuitStatus },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid input arity for `{field}`: expected {expected}, got {actual}")]
    InvalidInputArity {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Root cause of a failed proof generation.
#[derive(Error, Debug)]
pub enum GenerationFailure {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error("witness tool exited successfully but produced no witness at {0}")]
    WitnessNotProduced(PathBuf),

    #[error("proving tool exited successfully but produced no proof at {0}")]
    ProofNotProduced(PathBuf),

    #[error("proof artifact missing at {path}: {source}")]
    ProofArtifactMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("generation task aborted: {0}")]
    TaskAborted(String),
}

/// Any generation failure, tagged with the circuit it was for.
#[derive(Error, Debug)]
#[error("Proof generation failed for {kind} circuit: {failure}")]
pub struct ProofGenerationError {
    pub kind: CircuitKind,
    #[source]
    pub failure: GenerationFailure,
}

impl ProofGenerationError {
    pub fn new(kind: CircuitKind, failure: impl Into<GenerationFailure>) -> Self {
        Self {
            kind,
            failure: failure.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("No verifier program configured for {0} circuit")]
    MissingProgramId(CircuitKind),

    #[error("RPC error: {0}")]
    Client(#[from] ClientError),

    #[error("Failed to encode transaction: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Transaction {signature} failed: {error}")]
    Transaction {
        signature: String,
        #[source]
        error: TransactionError,
    },

    #[error("Transaction {signature} expired before reaching the requested commitment")]
    Expired { signature: String },

    #[error("Transaction is {size} bytes, over the {limit}-byte packet limit")]
    TransactionTooLarge { size: usize, limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Terminal error of a verification task.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error(transparent)]
    Generation(#[from] Arc<ProofGenerationError>),

    #[error(transparent)]
    Submission(#[from] SubmitError),

    #[error("verification task aborted: {0}")]
    Aborted(String),
}
