use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use sha2::{Digest, Sha256};

use crate::circuit::{CircuitKind, CircuitRegistry};
use crate::error::{GenerationFailure, ProofGenerationError, RegistryError};
use crate::executor::{ProcessExecutor, RunOptions};
use crate::inputs::ProverInputs;

/// Result of a generation, shared by every caller that joined it.
pub type ProofResult = Result<Arc<ProofPayload>, Arc<ProofGenerationError>>;

type SharedProof = Shared<BoxFuture<'static, ProofResult>>;

/// Content hash identifying a (circuit, inputs) pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn compute(kind: CircuitKind, inputs: &ProverInputs) -> Self {
        Self::from_toml(kind, &inputs.to_toml())
    }

    fn from_toml(kind: CircuitKind, toml: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(toml.as_bytes());
        Fingerprint(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// A generated proof and its public witness, as written by the proving tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofPayload {
    pub kind: CircuitKind,
    pub fingerprint: Fingerprint,
    pub proof: Vec<u8>,
    pub public_witness: Vec<u8>,
    pub generated_at: DateTime<Utc>,
}

impl ProofPayload {
    pub fn proof_hex(&self) -> String {
        hex::encode(&self.proof)
    }

    pub fn public_witness_hex(&self) -> String {
        hex::encode(&self.public_witness)
    }
}

/// External executables used to produce a proof.
#[derive(Clone, Debug)]
pub struct Toolchain {
    /// Run as `<witness_tool> execute` in the circuit source dir.
    pub witness_tool: PathBuf,
    /// Run as `<proving_tool> prove <acir> <witness> <ccs> <pk>`.
    pub proving_tool: PathBuf,
    /// Proving is much slower than witness generation; `None` uses the executor default.
    pub prove_timeout_secs: Option<u64>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            witness_tool: PathBuf::from("nargo"),
            proving_tool: PathBuf::from("sunspot"),
            prove_timeout_secs: None,
        }
    }
}

/// Produces proofs by driving the witness and proving tools.
///
/// Concurrent requests for the same fingerprint share one execution. Tool
/// work for a given circuit kind is serialized, because every generation of
/// that kind reads and writes the same `Prover.toml` and `target/` files.
pub struct ProofGenerator {
    pipeline: Arc<Pipeline>,
    inflight: Arc<Mutex<HashMap<Fingerprint, SharedProof>>>,
}

struct Pipeline {
    registry: Arc<CircuitRegistry>,
    executor: ProcessExecutor,
    toolchain: Toolchain,
    kind_locks: HashMap<CircuitKind, tokio::sync::Mutex<()>>,
}

impl ProofGenerator {
    pub fn new(
        registry: Arc<CircuitRegistry>,
        executor: ProcessExecutor,
        toolchain: Toolchain,
    ) -> Self {
        let kind_locks = CircuitKind::ALL
            .iter()
            .map(|kind| (*kind, tokio::sync::Mutex::new(())))
            .collect();
        Self {
            pipeline: Arc::new(Pipeline {
                registry,
                executor,
                toolchain,
                kind_locks,
            }),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<CircuitRegistry> {
        &self.pipeline.registry
    }

    /// Number of distinct generations currently running.
    pub fn in_flight(&self) -> usize {
        self.lock_inflight().len()
    }

    /// Generate a proof for `inputs` on the `kind` circuit.
    ///
    /// Fails fast with `CircuitNotReady` if the constraint artifacts are
    /// missing. If an identical request is already running, waits for it and
    /// returns its outcome instead of starting another one. The work itself
    /// runs on a spawned task, so dropping this future does not cancel it.
    pub async fn generate_proof(&self, kind: CircuitKind, inputs: &ProverInputs) -> ProofResult {
        let wrap = |e: RegistryError| Arc::new(ProofGenerationError::new(kind, e));

        let status = self.pipeline.registry.status(kind).map_err(wrap)?;
        if !status.is_ready() {
            tracing::warn!("Circuit {} not ready: {}", kind, status);
            return Err(wrap(RegistryError::CircuitNotReady { kind, status }));
        }

        let toml = inputs.to_toml();
        let fingerprint = Fingerprint::from_toml(kind, &toml);
        let shared = self.join_or_start(kind, fingerprint, toml);
        shared.await
    }

    fn join_or_start(&self, kind: CircuitKind, fingerprint: Fingerprint, toml: String) -> SharedProof {
        let mut inflight = self.lock_inflight();
        if let Some(existing) = inflight.get(&fingerprint) {
            tracing::info!(
                "Joining in-flight proof generation circuit={} fingerprint={}",
                kind,
                fingerprint
            );
            return existing.clone();
        }

        let pipeline = self.pipeline.clone();
        let guard = InflightGuard {
            inflight: self.inflight.clone(),
            fingerprint,
        };
        // The entry is inserted before this lock is released, so the guard's
        // removal can never run ahead of the insertion.
        let handle = tokio::spawn(async move {
            let _guard = guard;
            pipeline
                .run(kind, fingerprint, toml)
                .await
                .map(Arc::new)
                .map_err(|failure| Arc::new(ProofGenerationError::new(kind, failure)))
        });

        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Arc::new(ProofGenerationError::new(
                    kind,
                    GenerationFailure::TaskAborted(e.to_string()),
                ))),
            }
        }
        .boxed()
        .shared();

        inflight.insert(fingerprint, shared.clone());
        shared
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, SharedProof>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes a fingerprint from the in-flight map once its task settles (or panics).
struct InflightGuard {
    inflight: Arc<Mutex<HashMap<Fingerprint, SharedProof>>>,
    fingerprint: Fingerprint,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.fingerprint);
    }
}

impl Pipeline {
    async fn run(
        &self,
        kind: CircuitKind,
        fingerprint: Fingerprint,
        toml: String,
    ) -> Result<ProofPayload, GenerationFailure> {
        let config = self.registry.get(kind)?.clone();
        let input_path = config.input_config_path();
        let witness_path = self.registry.witness_path(kind);
        let proof_path = self.registry.proof_path(kind);
        let public_witness_path = self.registry.public_witness_path(kind);

        let _kind_guard = match self.kind_locks.get(&kind) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        tracing::info!(
            "Generating proof circuit={} fingerprint={}",
            kind,
            fingerprint
        );

        // Stale outputs from an earlier run would hide a tool that silently wrote nothing.
        for path in [&witness_path, &proof_path, &public_witness_path] {
            remove_if_exists(path).await?;
        }

        write_atomic(&input_path, toml.as_bytes()).await?;

        let witness = self
            .executor
            .run(
                &self.toolchain.witness_tool,
                &["execute"],
                &RunOptions::in_dir(&config.source_dir),
            )
            .await?;
        tracing::debug!("Witness generated for {} in {:?}", kind, witness.duration);
        if !exists(&witness_path).await {
            return Err(GenerationFailure::WitnessNotProduced(witness_path));
        }

        let mut options = RunOptions::in_dir(&config.source_dir);
        options.timeout_secs = self.toolchain.prove_timeout_secs;
        let args = [
            OsStr::new("prove"),
            config.acir_path.as_os_str(),
            witness_path.as_os_str(),
            config.ccs_path.as_os_str(),
            config.proving_key_path.as_os_str(),
        ];
        let proved = self
            .executor
            .run(&self.toolchain.proving_tool, &args, &options)
            .await?;
        if !exists(&proof_path).await {
            return Err(GenerationFailure::ProofNotProduced(proof_path));
        }

        let proof = read_artifact(&proof_path).await?;
        let public_witness = read_artifact(&public_witness_path).await?;

        tracing::info!(
            "Proof generated circuit={} proof={} bytes public_witness={} bytes ({:?})",
            kind,
            proof.len(),
            public_witness.len(),
            proved.duration
        );

        Ok(ProofPayload {
            kind,
            fingerprint,
            proof,
            public_witness,
            generated_at: Utc::now(),
        })
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write via a sibling temp file and rename, creating parent dirs.
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

async fn read_artifact(path: &Path) -> Result<Vec<u8>, GenerationFailure> {
    tokio::fs::read(path)
        .await
        .map_err(|source| GenerationFailure::ProofArtifactMissing {
            path: path.to_path_buf(),
            source,
        })
}
