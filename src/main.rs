use std::sync::Arc;

use poker_zk_verifier::circuit::CircuitRegistry;
use poker_zk_verifier::config::{ChainConfig, ProverConfig};
use poker_zk_verifier::executor::ProcessExecutor;
use poker_zk_verifier::manager::VerificationManager;
use poker_zk_verifier::prover::ProofGenerator;
use poker_zk_verifier::routes::{build_router, AppState};
use poker_zk_verifier::verifier::ChainSubmitter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poker_zk_verifier=info".into()),
        )
        .init();

    let prover_config = ProverConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("Invalid prover configuration: {}", e);
        std::process::exit(1);
    });
    let chain_config = ChainConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("Invalid chain configuration: {}", e);
        std::process::exit(1);
    });

    tracing::info!("Loading circuits from: {}", prover_config.circuits_dir.display());
    let registry = CircuitRegistry::with_defaults(&prover_config.circuits_dir);
    for status in registry.list() {
        if status.is_ready() {
            tracing::info!("Circuit {} ready ({})", status.kind, status);
        } else {
            tracing::warn!("Circuit {} not ready ({})", status.kind, status);
        }
    }

    let generator = Arc::new(ProofGenerator::new(
        Arc::new(registry),
        ProcessExecutor::new(prover_config.process_timeout_secs),
        prover_config.toolchain(),
    ));
    let submitter = Arc::new(ChainSubmitter::new(chain_config));
    let manager = Arc::new(VerificationManager::new(generator.clone(), submitter));

    let state = Arc::new(AppState { generator, manager });
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", prover_config.port);
    tracing::info!("Verifier service listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
