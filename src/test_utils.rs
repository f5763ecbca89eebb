//! Test fixtures: a temp circuit workspace with shell scripts standing in
//! for `nargo` and `sunspot`, a local JSON-RPC node, and an in-memory
//! proof submitter.

#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use solana_sdk::hash::Hash;
use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::{Transaction, TransactionError};
#[cfg(unix)]
use tempfile::TempDir;

#[cfg(unix)]
use crate::circuit::{tests::write_artifacts, CircuitKind, CircuitRegistry};
use crate::error::SubmitError;
#[cfg(unix)]
use crate::executor::ProcessExecutor;
use crate::prover::ProofPayload;
#[cfg(unix)]
use crate::prover::{ProofGenerator, Toolchain};
use crate::verifier::{Cluster, ProofSubmitter, VerificationOutcome};

#[cfg(unix)]
pub struct FakeToolchain {
    pub dir: TempDir,
    pub registry: Arc<CircuitRegistry>,
    witness_tool: PathBuf,
    proving_tool: PathBuf,
}

#[cfg(unix)]
pub struct FakeToolchainBuilder {
    witness_delay: String,
    produce_witness: bool,
    produce_proof: bool,
    produce_public_witness: bool,
    fail_prove_on: Option<String>,
}

#[cfg(unix)]
impl FakeToolchainBuilder {
    /// Seconds the witness tool sleeps, as passed to `sleep`.
    pub fn witness_delay(mut self, secs: &str) -> Self {
        self.witness_delay = secs.to_string();
        self
    }

    pub fn produce_witness(mut self, yes: bool) -> Self {
        self.produce_witness = yes;
        self
    }

    pub fn produce_proof(mut self, yes: bool) -> Self {
        self.produce_proof = yes;
        self
    }

    pub fn produce_public_witness(mut self, yes: bool) -> Self {
        self.produce_public_witness = yes;
        self
    }

    /// Make the proving tool exit 1 when `Prover.toml` contains `marker`.
    pub fn fail_prove_on(mut self, marker: &str) -> Self {
        self.fail_prove_on = Some(marker.to_string());
        self
    }

    pub fn build(self) -> FakeToolchain {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("circuits");
        let registry = CircuitRegistry::with_defaults(&base);
        for kind in CircuitKind::ALL {
            write_artifacts(&registry, kind);
        }

        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let target = base.join("target");

        // Both tools run with cwd = <base>/<kind>, so the kind is the cwd's basename.
        let mut witness = format!(
            "#!/bin/sh\necho \"$@\" >> '{calls}'\nsleep {delay}\n",
            calls = bin.join("witness.calls").display(),
            delay = self.witness_delay,
        );
        if self.produce_witness {
            witness.push_str(&format!(
                ": > '{}'/\"$(basename \"$PWD\")\".gz\n",
                target.display()
            ));
        }

        let mut prove = format!(
            "#!/bin/sh\necho \"$@\" >> '{calls}'\n",
            calls = bin.join("prove.calls").display(),
        );
        if let Some(marker) = &self.fail_prove_on {
            prove.push_str(&format!(
                "if grep -qF '{}' Prover.toml; then echo 'constraint failed' >&2; exit 1; fi\n",
                marker
            ));
        }
        if self.produce_proof {
            prove.push_str(&format!(
                "cp Prover.toml '{}'/\"$(basename \"$PWD\")\".proof\n",
                target.display()
            ));
        }
        if self.produce_public_witness {
            prove.push_str(&format!(
                "printf 'pw:%s' \"$(basename \"$PWD\")\" > '{}'/\"$(basename \"$PWD\")\".pw\n",
                target.display()
            ));
        }

        let witness_tool = write_script(&bin, "nargo", &witness);
        let proving_tool = write_script(&bin, "sunspot", &prove);

        FakeToolchain {
            dir,
            registry: Arc::new(registry),
            witness_tool,
            proving_tool,
        }
    }
}

#[cfg(unix)]
impl FakeToolchain {
    pub fn builder() -> FakeToolchainBuilder {
        FakeToolchainBuilder {
            witness_delay: "0".to_string(),
            produce_witness: true,
            produce_proof: true,
            produce_public_witness: true,
            fail_prove_on: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            witness_tool: self.witness_tool.clone(),
            proving_tool: self.proving_tool.clone(),
            prove_timeout_secs: Some(30),
        }
    }

    pub fn generator(&self) -> ProofGenerator {
        ProofGenerator::new(
            self.registry.clone(),
            ProcessExecutor::new(30),
            self.toolchain(),
        )
    }

    /// Argument lines the witness tool was invoked with, one per call.
    pub fn witness_calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("bin/witness.calls"))
    }

    pub fn prove_calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("bin/prove.calls"))
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn read_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// How the fake JSON-RPC node treats submitted transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeRpcMode {
    /// Unknown on the first poll, then processed, then confirmed.
    Confirm,
    /// Lands with an instruction error.
    TxError,
    /// Never seen; block height is already past the blockhash's validity.
    Expire,
    /// `sendTransaction` fails preflight.
    RejectSend,
}

#[derive(Default)]
struct FakeRpcState {
    sent: Vec<Transaction>,
    polls: std::collections::HashMap<String, u32>,
}

/// A local Solana JSON-RPC stand-in served by axum.
pub struct FakeRpc {
    addr: std::net::SocketAddr,
    state: Arc<std::sync::Mutex<FakeRpcState>>,
    handle: tokio::task::JoinHandle<()>,
}

pub const FAKE_LAST_VALID_BLOCK_HEIGHT: u64 = 1_000;

impl FakeRpc {
    pub async fn start(mode: FakeRpcMode) -> Self {
        use axum::routing::post;

        let state = Arc::new(std::sync::Mutex::new(FakeRpcState::default()));
        let handler_state = state.clone();
        let app = axum::Router::new().route(
            "/",
            post(move |axum::Json(req): axum::Json<serde_json::Value>| {
                let state = handler_state.clone();
                async move { axum::Json(fake_rpc_reply(mode, &state, &req)) }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every transaction accepted by `sendTransaction`, decoded.
    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().sent.clone()
    }
}

impl Drop for FakeRpc {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn fake_rpc_reply(
    mode: FakeRpcMode,
    state: &std::sync::Mutex<FakeRpcState>,
    req: &serde_json::Value,
) -> serde_json::Value {
    use base64::Engine;
    use serde_json::json;

    let id = req["id"].clone();
    let params = &req["params"];
    let mut state = state.lock().unwrap();

    let result = match req["method"].as_str().unwrap_or_default() {
        "getVersion" => json!({"solana-core": "2.1.0", "feature-set": 0}),
        "getLatestBlockhash" => json!({
            "context": {"slot": 1},
            "value": {
                "blockhash": Hash::new_from_array([3u8; 32]).to_string(),
                "lastValidBlockHeight": FAKE_LAST_VALID_BLOCK_HEIGHT,
            }
        }),
        "sendTransaction" => {
            if mode == FakeRpcMode::RejectSend {
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32002, "message": "Transaction simulation failed"}
                });
            }
            let wire = base64::engine::general_purpose::STANDARD
                .decode(params[0].as_str().unwrap_or_default())
                .unwrap();
            let tx: Transaction = bincode::deserialize(&wire).unwrap();
            let signature = tx.signatures[0].to_string();
            state.sent.push(tx);
            json!(signature)
        }
        "getSignatureStatuses" => {
            let signature = params[0][0].as_str().unwrap_or_default().to_string();
            let known = state
                .sent
                .iter()
                .any(|tx| tx.signatures[0].to_string() == signature);
            let polls = state.polls.entry(signature).or_insert(0);
            *polls += 1;
            let status = match (known, mode, *polls) {
                (false, _, _) | (_, FakeRpcMode::Expire, _) | (_, FakeRpcMode::Confirm, 1) => {
                    serde_json::Value::Null
                }
                (_, FakeRpcMode::Confirm, 2) => json!({
                    "slot": 2,
                    "confirmations": 0,
                    "status": {"Ok": null},
                    "err": null,
                    "confirmationStatus": "processed"
                }),
                (_, FakeRpcMode::TxError, _) => {
                    let err = json!({"InstructionError": [1, {"Custom": 6000}]});
                    json!({
                        "slot": 2,
                        "confirmations": 0,
                        "status": {"Err": err},
                        "err": err,
                        "confirmationStatus": "processed"
                    })
                }
                _ => json!({
                    "slot": 3,
                    "confirmations": 1,
                    "status": {"Ok": null},
                    "err": null,
                    "confirmationStatus": "confirmed"
                }),
            };
            json!({"context": {"slot": 3}, "value": [status]})
        }
        "getBlockHeight" => match mode {
            FakeRpcMode::Expire => json!(FAKE_LAST_VALID_BLOCK_HEIGHT + 1),
            _ => json!(10),
        },
        other => {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", other)}
            })
        }
    };

    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

/// Records submissions instead of sending them. Optionally waits on a
/// semaphore permit per submission, or rejects every proof.
#[derive(Default)]
pub struct FakeSubmitter {
    calls: std::sync::Mutex<Vec<ProofPayload>>,
    gate: Option<Arc<tokio::sync::Semaphore>>,
    reject: bool,
}

impl FakeSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<tokio::sync::Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ProofPayload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProofSubmitter for FakeSubmitter {
    async fn submit(&self, payload: &ProofPayload) -> Result<VerificationOutcome, SubmitError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(payload.clone());
            calls.len()
        };
        let signature = format!("sig-{}-{}", &payload.fingerprint.to_hex()[..8], n);
        if self.reject {
            return Err(SubmitError::Transaction {
                signature,
                error: TransactionError::InstructionError(1, InstructionError::Custom(6000)),
            });
        }
        Ok(VerificationOutcome {
            explorer_url: Cluster::Devnet.explorer_url(&signature, "https://api.devnet.solana.com"),
            signature,
            success: true,
            cluster: Cluster::Devnet,
        })
    }
}
