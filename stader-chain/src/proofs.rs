//! Reward proof download and local storage.

use std::fs;
use std::path::{Path, PathBuf};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use stader_core::collaborators::{CallError, CycleMerkleProof, ProofService, ProofStore};

/// Placeholder replaced by the cycle number in a proof URL template.
pub const CYCLE_PLACEHOLDER: &str = "{cycle}";
/// Placeholder replaced by the lowercase hex node address in a proof URL template.
pub const OPERATOR_PLACEHOLDER: &str = "{operator}";

/// Proof document served for one operator and cycle.
#[derive(Debug, Deserialize)]
struct ProofResponse {
    /// Claimable ETH in wei.
    eth: U256,
    /// Claimable SD in wei.
    sd: U256,
    /// Sibling hashes.
    proof: Vec<B256>,
}

/// [`ProofService`] fetching JSON proofs from a templated URL.
#[derive(Clone, Debug)]
pub struct HttpProofService {
    /// HTTP client.
    client: reqwest::Client,
    /// URL with `{cycle}` and `{operator}` placeholders.
    url_template: String,
}

impl HttpProofService {
    /// Creates a service for `url_template`.
    pub fn new(client: reqwest::Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    /// Proof URL of `operator` for `cycle`.
    pub fn proof_url(&self, cycle: u64, operator: Address) -> String {
        self.url_template
            .replace(CYCLE_PLACEHOLDER, &cycle.to_string())
            .replace(OPERATOR_PLACEHOLDER, &format!("{operator:#x}"))
    }
}

#[async_trait]
impl ProofService for HttpProofService {
    async fn fetch(&self, cycle: u64, operator: Address) -> Result<CycleMerkleProof, CallError> {
        let url = self.proof_url(cycle, operator);
        debug!("Fetching merkle proof for cycle {cycle} from {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(CallError::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CallError::NotFound {
                what: format!("merkle proof of {operator} for cycle {cycle}"),
            });
        }
        let body: ProofResponse = response
            .error_for_status()
            .map_err(CallError::transport)?
            .json()
            .await
            .map_err(CallError::transport)?;
        Ok(CycleMerkleProof {
            cycle,
            operator,
            eth: body.eth,
            sd: body.sd,
            proof: body.proof,
        })
    }
}

/// [`ProofStore`] keeping one JSON file per cycle in a directory.
#[derive(Clone, Debug)]
pub struct FsProofStore {
    /// Directory holding the proof files.
    dir: PathBuf,
}

impl FsProofStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the proof files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the proof file of `cycle`.
    pub fn cycle_path(&self, cycle: u64) -> PathBuf {
        self.dir.join(format!("cycle-{cycle}-merkle-proof.json"))
    }
}

impl ProofStore for FsProofStore {
    fn exists(&self, cycle: u64) -> bool {
        self.cycle_path(cycle).is_file()
    }

    fn write(&self, proof: &CycleMerkleProof) -> Result<(), CallError> {
        fs::create_dir_all(&self.dir).map_err(CallError::transport)?;
        let path = self.cycle_path(proof.cycle);
        let partial = path.with_extension("json.partial");
        let json = serde_json::to_vec_pretty(proof).map_err(CallError::transport)?;
        // Rename so a crash never leaves a truncated file that `exists` would accept.
        fs::write(&partial, json).map_err(CallError::transport)?;
        fs::rename(&partial, &path).map_err(CallError::transport)
    }
}
