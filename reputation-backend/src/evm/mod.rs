//! EVM (eip155) chain indexing against ERC-8004 registries

pub mod abi;
pub mod retry;
pub mod rpc;
pub mod scanner;

use async_trait::async_trait;
use ethers::types::{Address, Log, H256};
use reputation_types::hook_events;
use rusqlite::Connection;
use serde_json::json;

use crate::config::EvmChainConfig;
use crate::db::tables::identities::{find_identity, update_agent_uri};
use crate::db::tables::pending_reads::{clear_pending_read, queue_pending_read};
use crate::db::tables::sync_cursors::advance_block_cursor;
use crate::error::IndexResult;
use crate::hooks::PendingHooks;
use crate::identity::{global_agent_id, resolve_master_id, resolve_registration, ChainFamily, Registration};
use crate::reputation::{apply_chain_summary, ApplyOutcome};
pub use rpc::EvmRpc;
pub use scanner::{AgentDiscovered, AgentReputation, ChunkBatch, EvmScanner, ReputationReads, ScanReport, UriUpdate};

/// The JSON-RPC surface the scanner needs
#[async_trait]
pub trait EvmSource: Send + Sync {
    async fn block_number(&self) -> Result<u64, String>;

    /// `eth_getLogs` over `[from, to]` for any of `addresses`, topic0 in `topics`
    async fn get_logs(&self, addresses: &[Address], topics: &[H256], from: u64, to: u64) -> Result<Vec<Log>, String>;

    /// `eth_call` at latest
    async fn call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Counts of what one chunk changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkStats {
    pub agents_created: usize,
    pub uris_updated: usize,
    pub uris_for_unknown_agents: usize,
    pub reputations_changed: usize,
    pub reads_deferred: usize,
}

/// Master id of an agent registered on this chain's identity registry
pub fn evm_master_id(chain: &EvmChainConfig, local_id: &str) -> String {
    resolve_master_id(&global_agent_id(
        ChainFamily::Eip155,
        &chain.chain_key(),
        &chain.identity_registry,
        local_id,
    ))
}

/// Write one scanned chunk: registrations first, then URI updates and
/// summaries (which may reference agents registered in the same chunk),
/// then the cursor. Callers run this inside a single transaction.
pub fn apply_chunk(
    conn: &Connection,
    chain: &EvmChainConfig,
    batch: &ChunkBatch,
    hooks: &mut PendingHooks,
) -> IndexResult<ChunkStats> {
    let chain_key = chain.chain_key();
    let mut stats = ChunkStats::default();

    for discovered in &batch.discovered {
        let registration = Registration {
            family: ChainFamily::Eip155,
            chain_id: chain_key.clone(),
            registry: chain.identity_registry.clone(),
            local_id: discovered.agent_id.clone(),
            owner_address: discovered.owner_address.clone(),
            agent_uri: discovered.agent_uri.clone(),
            position: discovered.block_number,
        };
        let resolved = resolve_registration(conn, &registration)?;

        if resolved.agent_created {
            stats.agents_created += 1;
            hooks.push(
                hook_events::AGENT_REGISTERED,
                &resolved.master_agent_id,
                json!({
                    "chain_id": chain_key,
                    "global_agent_id": resolved.global_agent_id,
                    "l2_agent_id": discovered.agent_id,
                    "owner_address": discovered.owner_address.to_lowercase(),
                    "agent_uri": discovered.agent_uri,
                    "block_number": discovered.block_number,
                }),
            );
        }
    }

    for update in &batch.uri_updates {
        let gid = global_agent_id(ChainFamily::Eip155, &chain_key, &chain.identity_registry, &update.agent_id);
        if update_agent_uri(conn, &gid, &update.agent_uri)? {
            stats.uris_updated += 1;
        } else if find_identity(conn, &gid)?.is_none() {
            stats.uris_for_unknown_agents += 1;
            log::warn!(
                "[evm:{}] URIUpdated for unknown agent {} at block {}",
                chain_key,
                update.agent_id,
                update.block_number
            );
        }
    }

    apply_reads(conn, chain, &batch.reads, hooks, &mut stats)?;

    advance_block_cursor(conn, &chain_key, batch.to)?;
    Ok(stats)
}

/// Write summaries re-read for agents queued by earlier cycles. The cursor
/// is untouched. Callers run this inside a single transaction.
pub fn apply_pending_reads(
    conn: &Connection,
    chain: &EvmChainConfig,
    reads: &ReputationReads,
    hooks: &mut PendingHooks,
) -> IndexResult<ChunkStats> {
    let mut stats = ChunkStats::default();
    apply_reads(conn, chain, reads, hooks, &mut stats)?;
    Ok(stats)
}

/// Successful and reverted reads leave the retry queue; deferred ones join it
fn apply_reads(
    conn: &Connection,
    chain: &EvmChainConfig,
    reads: &ReputationReads,
    hooks: &mut PendingHooks,
    stats: &mut ChunkStats,
) -> IndexResult<()> {
    let chain_key = chain.chain_key();

    for reading in &reads.readings {
        let master_agent_id = evm_master_id(chain, &reading.agent_id);
        let outcome = apply_chain_summary(conn, hooks, &master_agent_id, &chain_key, &reading.summary)?;
        if matches!(outcome, ApplyOutcome::Changed { .. }) {
            stats.reputations_changed += 1;
        }
        clear_pending_read(conn, &chain_key, &reading.agent_id)?;
    }
    for agent_id in &reads.reverted {
        clear_pending_read(conn, &chain_key, agent_id)?;
    }
    for agent_id in &reads.deferred {
        queue_pending_read(conn, &chain_key, agent_id)?;
        stats.reads_deferred += 1;
    }
    Ok(())
}
