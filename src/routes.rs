use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::{GenerationFailure, ProofGenerationError, RegistryError};
use crate::inputs::CircuitInputs;
use crate::manager::{RoundId, VerificationManager};
use crate::prover::ProofGenerator;
use crate::types::{
    CircuitInfo, CircuitsResponse, CleanupResponse, ErrorResponse, HealthResponse, ProveResponse,
    QueueTaskResponse,
};

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub generator: Arc<ProofGenerator>,
    pub manager: Arc<VerificationManager>,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn generation_status(err: &ProofGenerationError) -> StatusCode {
    match &err.failure {
        GenerationFailure::Registry(RegistryError::CircuitNotReady { .. }) => StatusCode::CONFLICT,
        GenerationFailure::Registry(RegistryError::UnknownCircuit(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /prove — Generate a proof and wait for it.
///
/// Request body: `{"circuit": "shuffle" | "community" | "reveal", "inputs": {...}}`
/// Response: ProveResponse { circuit, fingerprint, proof, publicWitness, generatedAt } (hex)
pub async fn prove_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CircuitInputs>,
) -> Response {
    let kind = req.kind();
    let inputs = match req.to_prover_inputs() {
        Ok(inputs) => inputs,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.generator.generate_proof(kind, &inputs).await {
        Ok(payload) => (StatusCode::OK, Json(ProveResponse::from(payload.as_ref()))).into_response(),
        Err(e) => {
            tracing::error!("{}", e);
            error_response(generation_status(&e), e)
        }
    }
}

/// POST /rounds/:round_id/tasks — Queue a proof-and-verify task.
///
/// Returns 202 immediately; progress is visible through the round summary.
pub async fn queue_task_handler(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
    Json(req): Json<CircuitInputs>,
) -> Response {
    let kind = req.kind();
    let inputs = match req.to_prover_inputs() {
        Ok(inputs) => inputs,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let task = state.manager.queue_task(round_id, kind, inputs);
    (
        StatusCode::ACCEPTED,
        Json(QueueTaskResponse {
            task_id: task.id(),
            round_id,
            circuit: kind,
            status: task.status(),
        }),
    )
        .into_response()
}

/// GET /rounds/:round_id/summary — Live snapshot of a round.
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> impl IntoResponse {
    Json(state.manager.get_summary(round_id))
}

/// POST /rounds/:round_id/verify — Wait for every task in the round, then summarize.
pub async fn verify_round_handler(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> impl IntoResponse {
    Json(state.manager.round_verification(round_id).await)
}

/// DELETE /rounds/:round_id — Discard a round's tasks.
pub async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<RoundId>,
) -> impl IntoResponse {
    let removed_tasks = state.manager.cleanup(round_id);
    Json(CleanupResponse {
        round_id,
        removed_tasks,
    })
}

/// GET /circuits — Artifact status for every registered circuit.
pub async fn circuits_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let circuits = state
        .generator
        .registry()
        .list()
        .into_iter()
        .map(CircuitInfo::from)
        .collect();
    Json(CircuitsResponse { circuits })
}

/// GET /health — Health check endpoint.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let statuses = state.generator.registry().list();
    Json(HealthResponse {
        status: "ok".to_string(),
        circuits_registered: statuses.len(),
        circuits_ready: statuses.iter().filter(|s| s.is_ready()).count(),
        proofs_in_flight: state.generator.in_flight(),
    })
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> axum::Router {
    use axum::routing::{delete, get, post};
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/prove", post(prove_handler))
        .route("/rounds/:round_id/tasks", post(queue_task_handler))
        .route("/rounds/:round_id/summary", get(summary_handler))
        .route("/rounds/:round_id/verify", post(verify_round_handler))
        .route("/rounds/:round_id", delete(cleanup_handler))
        .route("/circuits", get(circuits_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}
