//! Startup configuration, resolved once from the environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair};

use crate::circuit::CircuitKind;
use crate::error::ConfigError;
use crate::executor::DEFAULT_TIMEOUT_SECS;
use crate::prover::Toolchain;

pub const DEFAULT_PORT: u16 = 4003;
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 500_000;
pub const DEFAULT_CONFIRM_POLL_MS: u64 = 500;

fn program_id_var(kind: CircuitKind) -> &'static str {
    match kind {
        CircuitKind::Shuffle => "SHUFFLE_VERIFIER_PROGRAM_ID",
        CircuitKind::Community => "COMMUNITY_VERIFIER_PROGRAM_ID",
        CircuitKind::Reveal => "REVEAL_VERIFIER_PROGRAM_ID",
    }
}

/// Reads optional variables, treating empty values as unset.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn require(&self, var: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing(var))
    }

    fn parse_or<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }
}

/// Where the circuits live and which tools build proofs for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProverConfig {
    pub circuits_dir: PathBuf,
    pub witness_tool: PathBuf,
    pub proving_tool: PathBuf,
    pub process_timeout_secs: u64,
    pub prove_timeout_secs: u64,
    pub port: u16,
}

impl ProverConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let process_timeout_secs = vars.parse_or("PROCESS_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        if process_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PROCESS_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            circuits_dir: vars
                .get("CIRCUITS_DIR")
                .unwrap_or_else(|| "./circuits".to_string())
                .into(),
            witness_tool: vars.get("NARGO_BIN").unwrap_or_else(|| "nargo".to_string()).into(),
            proving_tool: vars
                .get("SUNSPOT_BIN")
                .unwrap_or_else(|| "sunspot".to_string())
                .into(),
            process_timeout_secs,
            prove_timeout_secs: vars.parse_or("PROVE_TIMEOUT_SECS", process_timeout_secs)?,
            port: vars.parse_or("PORT", DEFAULT_PORT)?,
        })
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain {
            witness_tool: self.witness_tool.clone(),
            proving_tool: self.proving_tool.clone(),
            prove_timeout_secs: Some(self.prove_timeout_secs),
        }
    }
}

/// Everything the chain submitter needs; all required fields are checked here.
#[derive(Debug)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub program_ids: HashMap<CircuitKind, Pubkey>,
    pub signer: Keypair,
    pub compute_unit_limit: u32,
    /// Defaults to `confirmed`, not the SDK's `finalized`.
    pub commitment: CommitmentConfig,
    pub confirm_poll_interval: Duration,
}

impl ChainConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars { lookup };
        let rpc_url = vars.require("SOLANA_RPC_URL")?;
        reqwest::Url::parse(&rpc_url).map_err(|e| ConfigError::Invalid {
            var: "SOLANA_RPC_URL",
            reason: e.to_string(),
        })?;

        let mut program_ids = HashMap::new();
        for kind in CircuitKind::ALL {
            let var = program_id_var(kind);
            let id = vars
                .require(var)?
                .trim()
                .parse::<Pubkey>()
                .map_err(|e| ConfigError::Invalid {
                    var,
                    reason: e.to_string(),
                })?;
            program_ids.insert(kind, id);
        }

        let signer = match vars.get("SOLANA_PRIVATE_KEY") {
            Some(key) => keypair_from_base58(key.trim()).map_err(|reason| ConfigError::Invalid {
                var: "SOLANA_PRIVATE_KEY",
                reason,
            })?,
            None => {
                let path = vars.require("SOLANA_KEYPAIR_PATH")?;
                read_keypair_file(&path).map_err(|e| ConfigError::Invalid {
                    var: "SOLANA_KEYPAIR_PATH",
                    reason: e.to_string(),
                })?
            }
        };

        let commitment = match vars.get("SOLANA_COMMITMENT") {
            Some(raw) => {
                let level = raw.trim().parse::<CommitmentLevel>().map_err(|e| {
                    ConfigError::Invalid {
                        var: "SOLANA_COMMITMENT",
                        reason: e.to_string(),
                    }
                })?;
                CommitmentConfig { commitment: level }
            }
            None => CommitmentConfig::confirmed(),
        };

        Ok(Self {
            rpc_url,
            program_ids,
            signer,
            compute_unit_limit: vars.parse_or("COMPUTE_UNIT_LIMIT", DEFAULT_COMPUTE_UNIT_LIMIT)?,
            commitment,
            confirm_poll_interval: Duration::from_millis(
                vars.parse_or("CONFIRM_POLL_MS", DEFAULT_CONFIRM_POLL_MS)?,
            ),
        })
    }
}

/// 64-byte secret-then-public keypair, as exported by wallets.
fn keypair_from_base58(key: &str) -> Result<Keypair, String> {
    let bytes = bs58::decode(key).into_vec().map_err(|e| e.to_string())?;
    Keypair::from_bytes(&bytes).map_err(|e| e.to_string())
}
