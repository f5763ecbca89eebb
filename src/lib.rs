//! Proof generation and on-chain verification pipeline for the poker circuits.
//!
//! Proofs are produced by driving the external `nargo`/`sunspot` toolchain
//! over per-circuit artifacts, deduplicated per input fingerprint, and then
//! submitted to the per-circuit Solana verifier programs. Verification tasks
//! are grouped by game round and awaited together.

pub mod circuit;
pub mod config;
pub mod error;
pub mod executor;
pub mod inputs;
pub mod manager;
pub mod prover;
pub mod routes;
pub mod types;
pub mod verifier;

#[cfg(test)]
mod test_utils;
