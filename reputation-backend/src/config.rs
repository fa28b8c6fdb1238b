use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const DATABASE_URL: &str = "INDEXER_DATABASE_URL";
    pub const CHAINS_CONFIG: &str = "INDEXER_CHAINS_CONFIG";
    pub const POLL_INTERVAL_SECS: &str = "INDEXER_POLL_INTERVAL_SECS";
    pub const HOOK_CALLBACK_URL: &str = "INDEXER_HOOK_CALLBACK_URL";
    pub const ALCHEMY_API_KEY: &str = "ALCHEMY_API_KEY";
}

/// Default values
pub mod defaults {
    pub const DATABASE_URL: &str = "./.db/reputation.db";
    pub const CHAINS_CONFIG: &str = "./config/chains.ron";
    pub const POLL_INTERVAL_SECS: u64 = 30;
    pub const EVM_CHUNK_SIZE: u64 = 2000;
    pub const EVM_SCAN_DELAY_MS: u64 = 250;
    pub const SATI_SCAN_DELAY_MS: u64 = 200;
    pub const SATI_PAGE_LIMIT: usize = 1000;
}

/// Placeholder in RPC URLs replaced by the Alchemy key
const ALCHEMY_PLACEHOLDER: &str = "{ALCHEMY_API_KEY}";

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub chains_config: String,
    pub poll_interval_secs: u64,
    pub hook_callback_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            chains_config: env::var(env_vars::CHAINS_CONFIG)
                .unwrap_or_else(|_| defaults::CHAINS_CONFIG.to_string()),
            poll_interval_secs: env::var(env_vars::POLL_INTERVAL_SECS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::POLL_INTERVAL_SECS),
            hook_callback_url: env::var(env_vars::HOOK_CALLBACK_URL)
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }
}

/// One EVM chain running the ERC-8004 registries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub identity_registry: String,
    #[serde(default)]
    pub reputation_registry: Option<String>,
    #[serde(default)]
    pub from_block: u64,
    #[serde(default)]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub scan_delay_ms: Option<u64>,
}

impl EvmChainConfig {
    /// Chain key used in the store (`chain_id` columns)
    pub fn chain_key(&self) -> String {
        self.chain_id.to_string()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size.unwrap_or(defaults::EVM_CHUNK_SIZE).max(1)
    }

    pub fn scan_delay_ms(&self) -> u64 {
        self.scan_delay_ms.unwrap_or(defaults::EVM_SCAN_DELAY_MS)
    }
}

/// One Solana cluster running the SATI program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatiChainConfig {
    /// Store key for this cluster, e.g. "solana-mainnet"
    pub chain_id: String,
    pub rpc_url: String,
    pub program_id: String,
    #[serde(default)]
    pub from_signature: Option<String>,
    #[serde(default)]
    pub scan_delay_ms: Option<u64>,
    #[serde(default)]
    pub page_limit: Option<usize>,
}

impl SatiChainConfig {
    pub fn scan_delay_ms(&self) -> u64 {
        self.scan_delay_ms.unwrap_or(defaults::SATI_SCAN_DELAY_MS)
    }

    pub fn page_limit(&self) -> usize {
        self.page_limit.unwrap_or(defaults::SATI_PAGE_LIMIT).clamp(1, 1000)
    }
}

/// Contents of `chains.ron`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainsFile {
    #[serde(default)]
    pub evm: Vec<EvmChainConfig>,
    #[serde(default)]
    pub sati: Vec<SatiChainConfig>,
}

impl ChainsFile {
    pub fn is_empty(&self) -> bool {
        self.evm.is_empty() && self.sati.is_empty()
    }
}

/// Load and validate the chain list. Any error here is fatal at startup.
pub fn load_chains(path: &Path) -> Result<ChainsFile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let alchemy_key = env::var(env_vars::ALCHEMY_API_KEY).ok().filter(|k| !k.is_empty());
    parse_chains(&content, alchemy_key.as_deref())
}

pub fn parse_chains(content: &str, alchemy_key: Option<&str>) -> Result<ChainsFile, String> {
    let mut chains: ChainsFile =
        ron::from_str(content).map_err(|e| format!("Failed to parse chains config: {}", e))?;

    if chains.is_empty() {
        return Err("No chains configured".to_string());
    }

    let mut seen = HashSet::new();

    for chain in chains.evm.iter_mut() {
        chain.rpc_url = expand_rpc_url(&chain.rpc_url, alchemy_key)?;
        Address::from_str(&chain.identity_registry).map_err(|e| {
            format!("Chain {}: invalid identity registry {}: {}", chain.chain_id, chain.identity_registry, e)
        })?;
        if let Some(ref reputation) = chain.reputation_registry {
            Address::from_str(reputation).map_err(|e| {
                format!("Chain {}: invalid reputation registry {}: {}", chain.chain_id, reputation, e)
            })?;
        }
        if !seen.insert(chain.chain_key()) {
            return Err(format!("Duplicate chain id {}", chain.chain_id));
        }
    }

    for chain in chains.sati.iter_mut() {
        chain.rpc_url = expand_rpc_url(&chain.rpc_url, alchemy_key)?;
        let program = bs58::decode(&chain.program_id)
            .into_vec()
            .map_err(|e| format!("Chain {}: invalid program id: {}", chain.chain_id, e))?;
        if program.len() != 32 {
            return Err(format!("Chain {}: program id must be 32 bytes", chain.chain_id));
        }
        if !seen.insert(chain.chain_id.clone()) {
            return Err(format!("Duplicate chain id {}", chain.chain_id));
        }
    }

    Ok(chains)
}

/// Substitute the Alchemy key placeholder and validate the result
fn expand_rpc_url(raw: &str, alchemy_key: Option<&str>) -> Result<String, String> {
    let expanded = if raw.contains(ALCHEMY_PLACEHOLDER) {
        let key = alchemy_key.ok_or_else(|| {
            format!("{} not set but required by RPC URL {}", env_vars::ALCHEMY_API_KEY, raw)
        })?;
        raw.replace(ALCHEMY_PLACEHOLDER, key)
    } else {
        raw.to_string()
    };

    url::Url::parse(&expanded).map_err(|e| format!("Invalid RPC URL {}: {}", raw, e))?;
    Ok(expanded)
}
