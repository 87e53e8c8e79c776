use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tessera_core::{Blockchain, DidMethod, DidType, Network};
use tessera_merkle::IDENTITY_TREE_DEPTH;
use tessera_proof::VerifyOptions;

use crate::error::{TesseraError, TesseraResult};
use crate::transition::RetryPolicy;

/// Which DID type new identities are created under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_method")]
    pub method: DidMethod,

    #[serde(default = "default_blockchain")]
    pub blockchain: Blockchain,

    #[serde(default = "default_network")]
    pub network: Network,

    /// Max depth of the Claims, Revocations and Roots trees.
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
}

fn default_method() -> DidMethod {
    DidMethod::Iden3
}

fn default_blockchain() -> Blockchain {
    Blockchain::Polygon
}

fn default_network() -> Network {
    Network::Amoy
}

fn default_tree_depth() -> usize {
    IDENTITY_TREE_DEPTH
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            blockchain: default_blockchain(),
            network: default_network(),
            tree_depth: default_tree_depth(),
        }
    }
}

/// Retry schedule for state-transition submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    10_000
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Accepted ages for proofs and the states they reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_proof_max_age")]
    pub proof_max_age_secs: u64,

    #[serde(default = "default_gist_root_max_age")]
    pub gist_root_max_age_secs: u64,

    #[serde(default = "default_non_revocation_max_age")]
    pub non_revocation_state_max_age_secs: u64,
}

fn default_proof_max_age() -> u64 {
    tessera_proof::verifier::DEFAULT_PROOF_MAX_AGE_SECS
}

fn default_gist_root_max_age() -> u64 {
    tessera_proof::verifier::DEFAULT_GIST_ROOT_MAX_AGE_SECS
}

fn default_non_revocation_max_age() -> u64 {
    tessera_proof::verifier::DEFAULT_NON_REVOCATION_STATE_MAX_AGE_SECS
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            proof_max_age_secs: default_proof_max_age(),
            gist_root_max_age_secs: default_gist_root_max_age(),
            non_revocation_state_max_age_secs: default_non_revocation_max_age(),
        }
    }
}

/// Top-level engine configuration.
///
/// Loaded from a TOML file (typically `~/.tessera/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub transition: TransitionConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl EngineConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> TesseraResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> TesseraResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TesseraError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> TesseraResult<()> {
        self.did_type()?;
        let depth = self.identity.tree_depth;
        if depth == 0 || depth > IDENTITY_TREE_DEPTH {
            return Err(TesseraError::Config(format!(
                "tree_depth must be between 1 and {}, got {}",
                IDENTITY_TREE_DEPTH, depth
            )));
        }

        let t = &self.transition;
        if t.max_retries > 10 {
            return Err(TesseraError::Config(format!(
                "max_retries must be <= 10, got {}",
                t.max_retries
            )));
        }
        if t.initial_delay_ms == 0 || t.max_delay_ms == 0 {
            return Err(TesseraError::Config("retry delays must be > 0".into()));
        }
        if t.initial_delay_ms > t.max_delay_ms {
            return Err(TesseraError::Config(format!(
                "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                t.initial_delay_ms, t.max_delay_ms
            )));
        }
        if !(1.0..=10.0).contains(&t.backoff_factor) {
            return Err(TesseraError::Config(format!(
                "backoff_factor must be between 1.0 and 10.0, got {}",
                t.backoff_factor
            )));
        }

        let v = &self.verifier;
        if v.proof_max_age_secs == 0
            || v.gist_root_max_age_secs == 0
            || v.non_revocation_state_max_age_secs == 0
        {
            return Err(TesseraError::Config("verifier max ages must be > 0".into()));
        }
        Ok(())
    }

    pub fn did_type(&self) -> TesseraResult<DidType> {
        Ok(DidType::new(
            self.identity.method,
            self.identity.blockchain,
            self.identity.network,
        )?)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transition.max_retries,
            initial_delay_ms: self.transition.initial_delay_ms,
            backoff_factor: self.transition.backoff_factor,
            max_delay_ms: self.transition.max_delay_ms,
        }
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            now: None,
            proof_max_age_secs: self.verifier.proof_max_age_secs,
            gist_root_max_age_secs: self.verifier.gist_root_max_age_secs,
            non_revocation_state_max_age_secs: self.verifier.non_revocation_state_max_age_secs,
        }
    }

    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".tessera/config.toml")
    }
}
