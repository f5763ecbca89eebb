//! On-chain submission of generated proofs to the per-circuit verifier programs.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Signature, Signer};
use solana_sdk::transaction::Transaction;

use crate::config::ChainConfig;
use crate::error::SubmitError;
use crate::prover::ProofPayload;

const EXPLORER_BASE: &str = "https://explorer.solana.com";
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cluster {
    MainnetBeta,
    Testnet,
    Devnet,
    Custom,
}

impl Cluster {
    /// Infer the cluster from the RPC endpoint. Unrecognized endpoints are
    /// assumed to be devnet.
    pub fn from_rpc_url(rpc_url: &str) -> Self {
        let url = rpc_url.to_ascii_lowercase();
        if url.contains("mainnet") {
            Cluster::MainnetBeta
        } else if url.contains("testnet") {
            Cluster::Testnet
        } else if url.contains("devnet") {
            Cluster::Devnet
        } else if url.contains("localhost") || url.contains("127.0.0.1") {
            Cluster::Custom
        } else {
            Cluster::Devnet
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cluster::MainnetBeta => "mainnet-beta",
            Cluster::Testnet => "testnet",
            Cluster::Devnet => "devnet",
            Cluster::Custom => "custom",
        }
    }

    pub fn explorer_url(&self, signature: &str, rpc_url: &str) -> String {
        let base = format!("{}/tx/{}", EXPLORER_BASE, signature);
        let params: Vec<(&str, &str)> = match self {
            Cluster::MainnetBeta => return base,
            Cluster::Custom => vec![("cluster", "custom"), ("customUrl", rpc_url)],
            other => vec![("cluster", other.as_str())],
        };
        match reqwest::Url::parse_with_params(&base, &params) {
            Ok(url) => url.to_string(),
            Err(_) => base,
        }
    }
}

/// A confirmed verification transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub signature: String,
    pub success: bool,
    pub cluster: Cluster,
    pub explorer_url: String,
}

#[async_trait]
pub trait ProofSubmitter: Send + Sync {
    /// Submit the proof to its verifier program and wait for confirmation.
    async fn submit(&self, payload: &ProofPayload) -> Result<VerificationOutcome, SubmitError>;
}

pub struct ChainSubmitter {
    config: ChainConfig,
    rpc: RpcClient,
    cluster: Cluster,
}

impl ChainSubmitter {
    pub fn new(config: ChainConfig) -> Self {
        let cluster = Cluster::from_rpc_url(&config.rpc_url);
        tracing::info!(
            "Chain submitter: cluster={} payer={} commitment={:?}",
            cluster.as_str(),
            config.signer.pubkey(),
            config.commitment.commitment
        );
        Self {
            rpc: RpcClient::new_with_timeout_and_commitment(
                config.rpc_url.clone(),
                RPC_TIMEOUT,
                config.commitment,
            ),
            config,
            cluster,
        }
    }

    pub fn cluster(&self) -> Cluster {
        self.cluster
    }

    /// Build and sign the compute-budget + verify transaction for `payload`.
    fn build_transaction(
        &self,
        program_id: Pubkey,
        payload: &ProofPayload,
        recent_blockhash: Hash,
    ) -> Transaction {
        let mut data = Vec::with_capacity(payload.proof.len() + payload.public_witness.len());
        data.extend_from_slice(&payload.proof);
        data.extend_from_slice(&payload.public_witness);

        let instructions = [
            ComputeBudgetInstruction::set_compute_unit_limit(self.config.compute_unit_limit),
            Instruction::new_with_bytes(program_id, &data, vec![]),
        ];
        let payer = &self.config.signer;
        Transaction::new_signed_with_payer(
            &instructions,
            Some(&payer.pubkey()),
            &[payer],
            recent_blockhash,
        )
    }

    /// Poll until the signature reaches the configured commitment, fails, or
    /// its blockhash expires.
    async fn confirm(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> Result<(), SubmitError> {
        let commitment = self.config.commitment;
        loop {
            let status = self
                .rpc
                .get_signature_statuses(&[*signature])
                .await?
                .value
                .into_iter()
                .next()
                .flatten();
            match status {
                Some(status) => {
                    if let Some(error) = status.err {
                        return Err(SubmitError::Transaction {
                            signature: signature.to_string(),
                            error,
                        });
                    }
                    if status.satisfies_commitment(commitment) {
                        return Ok(());
                    }
                    tracing::debug!(
                        "{} at {:?}, waiting for {:?}",
                        signature,
                        status.confirmation_status,
                        commitment.commitment
                    );
                }
                None => {
                    let height = self.rpc.get_block_height().await?;
                    if height > last_valid_block_height {
                        return Err(SubmitError::Expired {
                            signature: signature.to_string(),
                        });
                    }
                }
            }
            tokio::time::sleep(self.config.confirm_poll_interval).await;
        }
    }
}

#[async_trait]
impl ProofSubmitter for ChainSubmitter {
    async fn submit(&self, payload: &ProofPayload) -> Result<VerificationOutcome, SubmitError> {
        let program_id = self
            .config
            .program_ids
            .get(&payload.kind)
            .copied()
            .ok_or(SubmitError::MissingProgramId(payload.kind))?;

        let start = Instant::now();
        let (blockhash, last_valid_block_height) = self
            .rpc
            .get_latest_blockhash_with_commitment(self.config.commitment)
            .await?;

        let transaction = self.build_transaction(program_id, payload, blockhash);
        let size = bincode::serialized_size(&transaction)? as usize;
        if size > PACKET_DATA_SIZE {
            return Err(SubmitError::TransactionTooLarge {
                size,
                limit: PACKET_DATA_SIZE,
            });
        }

        let signature = self.rpc.send_transaction(&transaction).await?;
        tracing::info!(
            "Submitted {} proof ({} bytes): {}",
            payload.kind,
            size,
            signature
        );

        self.confirm(&signature, last_valid_block_height).await?;
        tracing::info!(
            "Verified {} proof on {} in {:?}: {}",
            payload.kind,
            self.cluster.as_str(),
            start.elapsed(),
            signature
        );

        let signature = signature.to_string();
        Ok(VerificationOutcome {
            explorer_url: self.cluster.explorer_url(&signature, &self.config.rpc_url),
            signature,
            success: true,
            cluster: self.cluster,
        })
    }
}
