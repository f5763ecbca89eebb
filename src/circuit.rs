use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// Input file the witness tool reads from its working directory.
pub const INPUT_CONFIG_FILE: &str = "Prover.toml";

/// The three poker circuits compiled ahead of time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitKind {
    Shuffle,
    Community,
    Reveal,
}

impl CircuitKind {
    pub const ALL: [CircuitKind; 3] = [
        CircuitKind::Shuffle,
        CircuitKind::Community,
        CircuitKind::Reveal,
    ];

    /// Canonical path segment; also the package name inside the Noir workspace.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitKind::Shuffle => "shuffle",
            CircuitKind::Community => "community",
            CircuitKind::Reveal => "reveal",
        }
    }
}

impl fmt::Display for CircuitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shuffle" => Ok(CircuitKind::Shuffle),
            "community" => Ok(CircuitKind::Community),
            "reveal" => Ok(CircuitKind::Reveal),
            other => Err(RegistryError::UnknownCircuit(other.to_string())),
        }
    }
}

/// Artifact locations for a single circuit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitConfig {
    pub kind: CircuitKind,
    /// Noir package directory; the witness tool runs here.
    pub source_dir: PathBuf,
    /// Compiled ACIR program (`nargo compile` output).
    pub acir_path: PathBuf,
    /// Compiled constraint system.
    pub ccs_path: PathBuf,
    pub proving_key_path: PathBuf,
    pub verification_key_path: PathBuf,
}

impl CircuitConfig {
    /// Standard workspace layout:
    ///
    /// ```text
    /// base/
    ///   shuffle/            (source dir, Prover.toml written here)
    ///   target/shuffle.json (ACIR)
    ///   target/shuffle.ccs
    ///   target/shuffle.pk
    ///   target/shuffle.vk
    /// ```
    pub fn with_layout(base: &Path, kind: CircuitKind) -> Self {
        let target = base.join("target");
        let name = kind.as_str();
        Self {
            kind,
            source_dir: base.join(name),
            acir_path: target.join(format!("{}.json", name)),
            ccs_path: target.join(format!("{}.ccs", name)),
            proving_key_path: target.join(format!("{}.pk", name)),
            verification_key_path: target.join(format!("{}.vk", name)),
        }
    }

    /// `Prover.toml` inside the source dir, where the witness tool looks for it.
    pub fn input_config_path(&self) -> PathBuf {
        self.source_dir.join(INPUT_CONFIG_FILE)
    }
}

/// Existence of each artifact, read from disk at query time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    pub kind: CircuitKind,
    pub acir: bool,
    pub ccs: bool,
    pub proving_key: bool,
    pub verification_key: bool,
}

impl CircuitStatus {
    /// The verification key is only needed to deploy the on-chain verifier.
    pub fn is_ready(&self) -> bool {
        self.acir && self.ccs && self.proving_key
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acir={} ccs={} pk={} vk={}",
            self.acir, self.ccs, self.proving_key, self.verification_key
        )
    }
}

/// Registry of circuit artifact locations, keyed by circuit kind.
#[derive(Debug)]
pub struct CircuitRegistry {
    base_dir: PathBuf,
    circuits: HashMap<CircuitKind, CircuitConfig>,
}

impl CircuitRegistry {
    /// Create an empty registry rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            circuits: HashMap::new(),
        }
    }

    /// Create a registry with every circuit registered under the standard layout.
    pub fn with_defaults(base_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new(base_dir);
        for kind in CircuitKind::ALL {
            let config = CircuitConfig::with_layout(&registry.base_dir, kind);
            registry.register(config);
        }
        registry
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Insert or replace the artifact paths for `config.kind`.
    pub fn register(&mut self, config: CircuitConfig) {
        tracing::debug!(
            "Registering circuit {} (source: {})",
            config.kind,
            config.source_dir.display()
        );
        self.circuits.insert(config.kind, config);
    }

    pub fn get(&self, kind: CircuitKind) -> Result<&CircuitConfig, RegistryError> {
        self.circuits
            .get(&kind)
            .ok_or_else(|| RegistryError::UnknownCircuit(kind.to_string()))
    }

    pub fn status(&self, kind: CircuitKind) -> Result<CircuitStatus, RegistryError> {
        let config = self.get(kind)?;
        Ok(CircuitStatus {
            kind,
            acir: config.acir_path.exists(),
            ccs: config.ccs_path.exists(),
            proving_key: config.proving_key_path.exists(),
            verification_key: config.verification_key_path.exists(),
        })
    }

    /// False for unregistered kinds.
    pub fn is_ready(&self, kind: CircuitKind) -> bool {
        self.status(kind).map(|s| s.is_ready()).unwrap_or(false)
    }

    /// Statuses of all registered circuits, in `CircuitKind` order.
    pub fn list(&self) -> Vec<CircuitStatus> {
        let mut kinds: Vec<CircuitKind> = self.circuits.keys().copied().collect();
        kinds.sort();
        kinds
            .into_iter()
            .filter_map(|kind| self.status(kind).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Follows a registered `source_dir`; unregistered kinds get the standard layout.
    pub fn input_config_path(&self, kind: CircuitKind) -> PathBuf {
        match self.circuits.get(&kind) {
            Some(config) => config.input_config_path(),
            None => self.base_dir.join(kind.as_str()).join(INPUT_CONFIG_FILE),
        }
    }

    pub fn witness_path(&self, kind: CircuitKind) -> PathBuf {
        self.target_file(kind, "gz")
    }

    pub fn proof_path(&self, kind: CircuitKind) -> PathBuf {
        self.target_file(kind, "proof")
    }

    pub fn public_witness_path(&self, kind: CircuitKind) -> PathBuf {
        self.target_file(kind, "pw")
    }

    fn target_file(&self, kind: CircuitKind, extension: &str) -> PathBuf {
        self.base_dir
            .join("target")
            .join(format!("{}.{}", kind.as_str(), extension))
    }
}
