use serde::Serialize;

use crate::circuit::{CircuitKind, CircuitStatus};
use crate::manager::{RoundId, TaskId, TaskStatus};
use crate::prover::ProofPayload;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveResponse {
    pub circuit: CircuitKind,
    pub fingerprint: String,
    pub proof: String,
    pub public_witness: String,
    pub generated_at: String,
}

impl From<&ProofPayload> for ProveResponse {
    fn from(payload: &ProofPayload) -> Self {
        Self {
            circuit: payload.kind,
            fingerprint: payload.fingerprint.to_hex(),
            proof: payload.proof_hex(),
            public_witness: payload.public_witness_hex(),
            generated_at: payload.generated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTaskResponse {
    pub task_id: TaskId,
    pub round_id: RoundId,
    pub circuit: CircuitKind,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CircuitInfo {
    #[serde(flatten)]
    pub status: CircuitStatus,
    pub ready: bool,
}

impl From<CircuitStatus> for CircuitInfo {
    fn from(status: CircuitStatus) -> Self {
        Self {
            ready: status.is_ready(),
            status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CircuitsResponse {
    pub circuits: Vec<CircuitInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub circuits_registered: usize,
    pub circuits_ready: usize,
    pub proofs_in_flight: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub round_id: RoundId,
    pub removed_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::ProverInputs;
    use crate::prover::Fingerprint;

    #[test]
    fn test_prove_response_serialize() {
        let payload = ProofPayload {
            kind: CircuitKind::Reveal,
            fingerprint: Fingerprint::compute(CircuitKind::Reveal, &ProverInputs::new()),
            proof: vec![0xde, 0xad, 0xbe, 0xef],
            public_witness: vec![0xca, 0xfe],
            generated_at: chrono::Utc::now(),
        };
        let json = serde_json::to_value(ProveResponse::from(&payload)).unwrap();
        assert_eq!(json["circuit"], "reveal");
        assert_eq!(json["proof"], "deadbeef");
        assert_eq!(json["publicWitness"], "cafe");
        assert_eq!(json["fingerprint"].as_str().unwrap().len(), 64);
        assert!(json["generatedAt"].is_string());
    }

    #[test]
    fn test_circuit_info_flattens_status() {
        let info = CircuitInfo::from(CircuitStatus {
            kind: CircuitKind::Community,
            acir: true,
            ccs: true,
            proving_key: true,
            verification_key: false,
        });
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "community");
        assert_eq!(json["provingKey"], true);
        assert_eq!(json["verificationKey"], false);
        assert_eq!(json["ready"], true);
    }

    #[test]
    fn test_queue_task_response_serialize() {
        let resp = QueueTaskResponse {
            task_id: 3,
            round_id: 42,
            circuit: CircuitKind::Shuffle,
            status: TaskStatus::Pending,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["taskId"], 3);
        assert_eq!(json["roundId"], 42);
        assert_eq!(json["circuit"], "shuffle");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse {
            status: "ok".to_string(),
            circuits_registered: 3,
            circuits_ready: 2,
            proofs_in_flight: 0,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["circuitsReady"], 2);
        assert_eq!(json["proofsInFlight"], 0);
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse {
            error: "Circuit not registered: poker".to_string(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"], "Circuit not registered: poker");
    }
}
