//! SATI (Solana Agent Trust Infrastructure) indexing

pub mod events;
pub mod outcome;
pub mod rpc;
pub mod scanner;

use async_trait::async_trait;
use reputation_types::{hook_events, AddressLink, SatiAttestation};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SatiChainConfig;
use crate::db::tables::address_links::insert_address_link;
use crate::db::tables::sati_attestations::insert_attestation;
use crate::db::tables::sync_cursors::advance_signature_cursor;
use crate::error::IndexResult;
use crate::hooks::PendingHooks;
use crate::identity::{global_agent_id, resolve_master_id, resolve_registration, ChainFamily, Registration};
use crate::reputation::{apply_chain_summary, summarize_attestations, ApplyOutcome};
pub use rpc::SolanaRpc;
pub use scanner::{SatiScanReport, SatiScanner, ScannedEvent, ScannedTransaction};

/// Entry of `getSignaturesForAddress`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub slot: u64,
    pub failed: bool,
    pub log_messages: Vec<String>,
}

/// The Solana RPC surface the scanner needs
#[async_trait]
pub trait SatiSource: Send + Sync {
    /// One newest-first page of signatures, strictly between `before` and `until`
    async fn signatures_for_address(
        &self,
        address: &str,
        before: Option<&str>,
        until: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, String>;

    /// `None` when the node no longer has the transaction
    async fn transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, String>;

    /// Raw account bytes, `None` when the account does not exist
    async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, String>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxStats {
    pub agents_created: usize,
    pub attestations_added: usize,
    pub address_links_added: usize,
}

/// Master id of an agent minted by this SATI program
pub fn sati_master_id(chain: &SatiChainConfig, mint: &str) -> String {
    resolve_master_id(&global_agent_id(ChainFamily::Solana, &chain.chain_id, &chain.program_id, mint))
}

/// Write one transaction's events and advance the signature cursor.
/// Callers run this inside a single transaction.
pub fn apply_transaction(
    conn: &Connection,
    chain: &SatiChainConfig,
    tx: &ScannedTransaction,
    hooks: &mut PendingHooks,
) -> IndexResult<TxStats> {
    let mut stats = TxStats::default();

    for event in &tx.events {
        match event {
            ScannedEvent::AgentRegistered(registered) => {
                let registration = Registration {
                    family: ChainFamily::Solana,
                    chain_id: chain.chain_id.clone(),
                    registry: chain.program_id.clone(),
                    local_id: registered.mint.clone(),
                    owner_address: registered.owner.clone(),
                    agent_uri: Some(registered.uri.clone()).filter(|u| !u.is_empty()),
                    position: tx.slot,
                };
                let resolved = resolve_registration(conn, &registration)?;
                if resolved.agent_created {
                    stats.agents_created += 1;
                    hooks.push(
                        hook_events::AGENT_REGISTERED,
                        &resolved.master_agent_id,
                        json!({
                            "chain_id": chain.chain_id,
                            "global_agent_id": resolved.global_agent_id,
                            "l2_agent_id": registered.mint,
                            "owner_address": registered.owner,
                            "agent_uri": registration.agent_uri,
                            "slot": tx.slot,
                            "tx_signature": tx.signature,
                        }),
                    );
                    // attestations indexed before the registration
                    refresh_attestation_summary(conn, hooks, chain, &resolved.master_agent_id)?;
                }
            }
            ScannedEvent::Attestation { event, outcome } => {
                let attestation = SatiAttestation {
                    master_agent_id: sati_master_id(chain, &event.agent_mint),
                    attestation_address: event.address.clone(),
                    counterparty: event.counterparty.clone(),
                    outcome: *outcome,
                    slot: tx.slot,
                    tx_signature: tx.signature.clone(),
                };
                if insert_attestation(conn, &chain.chain_id, &attestation)? {
                    stats.attestations_added += 1;
                    refresh_attestation_summary(conn, hooks, chain, &attestation.master_agent_id)?;
                }
            }
            ScannedEvent::AddressLinked(linked) => {
                let link = AddressLink {
                    master_agent_id: sati_master_id(chain, &linked.agent_mint),
                    foreign_chain_id: linked.chain_id.clone(),
                    foreign_address: linked.evm_address.clone(),
                    linked_at: linked.linked_at,
                    tx_signature: tx.signature.clone(),
                };
                if insert_address_link(conn, &link)? {
                    stats.address_links_added += 1;
                    log::info!(
                        "[sati:{}] Agent {} declared {} on {}",
                        chain.chain_id,
                        link.master_agent_id,
                        link.foreign_address,
                        link.foreign_chain_id
                    );
                }
            }
        }
    }

    advance_signature_cursor(conn, &chain.chain_id, tx.slot, &tx.signature)?;
    Ok(stats)
}

fn refresh_attestation_summary(
    conn: &Connection,
    hooks: &mut PendingHooks,
    chain: &SatiChainConfig,
    master_agent_id: &str,
) -> IndexResult<()> {
    let summary = summarize_attestations(conn, master_agent_id, &chain.chain_id)?;
    if summary.feedback_count.is_zero() {
        return Ok(());
    }
    if apply_chain_summary(conn, hooks, master_agent_id, &chain.chain_id, &summary)? == ApplyOutcome::AgentUnknown {
        log::debug!(
            "[sati:{}] Attestation stored for unregistered agent {}; summary deferred",
            chain.chain_id,
            master_agent_id
        );
    }
    Ok(())
}
