//! Identity resolution: chain-local registrations -> master identities.
//!
//! The master id is `keccak256(global_agent_id)`, so every scanner, every
//! restart and every replay resolves the same registration to the same agent.

use ethers::utils::keccak256;
use rusqlite::{Connection, Result as SqliteResult};
use strum::Display;

use crate::db::tables::agents::upsert_agent;
use crate::db::tables::identities::{upsert_identity, NewIdentity};

/// Chain family prefix of a global agent id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ChainFamily {
    Eip155,
    Solana,
}

/// Canonical natural key for one chain-local registration:
/// `<family>:<chain id>:<registry or program>:<local id>`.
/// EVM registry addresses are lower-cased; Solana keys are case-sensitive.
pub fn global_agent_id(family: ChainFamily, chain_id: &str, registry: &str, local_id: &str) -> String {
    let registry = match family {
        ChainFamily::Eip155 => registry.to_lowercase(),
        ChainFamily::Solana => registry.to_string(),
    };
    format!("{}:{}:{}:{}", family, chain_id, registry, local_id)
}

/// Deterministic 32-byte master id, hex encoded with a 0x prefix
pub fn resolve_master_id(global_agent_id: &str) -> String {
    format!("0x{}", hex::encode(keccak256(global_agent_id.as_bytes())))
}

/// One observed registration event, from either scanner
#[derive(Debug, Clone)]
pub struct Registration {
    pub family: ChainFamily,
    pub chain_id: String,
    pub registry: String,
    pub local_id: String,
    pub owner_address: String,
    pub agent_uri: Option<String>,
    /// Block height or slot
    pub position: u64,
}

impl Registration {
    pub fn global_agent_id(&self) -> String {
        global_agent_id(self.family, &self.chain_id, &self.registry, &self.local_id)
    }

    fn normalized_owner(&self) -> String {
        match self.family {
            ChainFamily::Eip155 => self.owner_address.to_lowercase(),
            ChainFamily::Solana => self.owner_address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub master_agent_id: String,
    pub global_agent_id: String,
    pub agent_created: bool,
}

/// Upsert the Agent and AgentIdentity rows for a registration.
/// Safe to replay: both writes are keyed by deterministic ids.
pub fn resolve_registration(conn: &Connection, registration: &Registration) -> SqliteResult<Resolved> {
    let global_agent_id = registration.global_agent_id();
    let master_agent_id = resolve_master_id(&global_agent_id);

    let agent_created = upsert_agent(
        conn,
        &master_agent_id,
        &registration.normalized_owner(),
        registration.position,
        &registration.chain_id,
    )?;

    let registry = match registration.family {
        ChainFamily::Eip155 => registration.registry.to_lowercase(),
        ChainFamily::Solana => registration.registry.clone(),
    };
    upsert_identity(
        conn,
        &NewIdentity {
            master_agent_id: &master_agent_id,
            global_agent_id: &global_agent_id,
            chain_id: &registration.chain_id,
            registry_address: &registry,
            l2_agent_id: &registration.local_id,
            agent_uri: registration.agent_uri.as_deref(),
            discovered_block: registration.position,
        },
    )?;

    Ok(Resolved { master_agent_id, global_agent_id, agent_created })
}
