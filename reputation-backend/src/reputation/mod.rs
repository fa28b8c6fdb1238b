//! Reputation aggregation: per-chain summaries, snapshot change-detection and
//! cross-chain unification.

pub mod unify;

use ethers::types::{I256, U256};
use reputation_types::hook_events;
use rusqlite::Connection;
use serde_json::json;

use crate::db::tables::agents::{agent_exists, set_unified};
use crate::db::tables::reputation::{insert_snapshot, latest_snapshot, list_latest_for_agents, upsert_latest, SummaryTriple};
use crate::db::tables::sati_attestations::list_attestations;
use crate::db::tables::wallet_links::linked_group;
use crate::error::{IndexError, IndexResult};
use crate::hooks::PendingHooks;
use unify::{weighted_average, ChainSummary, Unified};

/// A freshly-read per-chain summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReputation {
    pub value: I256,
    pub decimals: u32,
    pub feedback_count: U256,
}

impl ChainReputation {
    pub fn zero() -> Self {
        Self {
            value: I256::zero(),
            decimals: 0,
            feedback_count: U256::zero(),
        }
    }

    fn triple(&self) -> SummaryTriple {
        SummaryTriple {
            value: self.value.to_string(),
            decimals: self.decimals,
            feedback_count: self.feedback_count.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No agent row yet; nothing written
    AgentUnknown,
    /// Latest refreshed, history unchanged
    Unchanged,
    /// New snapshot appended and the group re-unified
    Changed { snapshot_id: i64, unified: Unified },
}

/// Record a per-chain summary for an agent.
///
/// The latest row is upserted; a snapshot is appended only when the
/// (value, decimals, count) triple differs from the previous snapshot, in
/// which case the agent's linked group is re-unified and
/// `reputation.changed` queued. An agent that does not exist yet is skipped.
pub fn apply_chain_summary(
    conn: &Connection,
    hooks: &mut PendingHooks,
    master_agent_id: &str,
    chain_id: &str,
    summary: &ChainReputation,
) -> IndexResult<ApplyOutcome> {
    if !agent_exists(conn, master_agent_id)? {
        log::warn!(
            "[reputation] Summary for unknown agent {} on chain {}; skipping until its registration is indexed",
            master_agent_id,
            chain_id
        );
        return Ok(ApplyOutcome::AgentUnknown);
    }

    let triple = summary.triple();
    upsert_latest(conn, master_agent_id, chain_id, &triple)?;

    if latest_snapshot(conn, master_agent_id, chain_id)?.as_ref() == Some(&triple) {
        return Ok(ApplyOutcome::Unchanged);
    }

    let snapshot_id = insert_snapshot(conn, master_agent_id, chain_id, &triple)?;
    let unified = recompute_unified(conn, master_agent_id)?;

    hooks.push(
        hook_events::REPUTATION_CHANGED,
        master_agent_id,
        json!({
            "chain_id": chain_id,
            "summary_value": triple.value,
            "summary_value_decimals": triple.decimals,
            "feedback_count": triple.feedback_count,
            "unified_value": unified.value_string(),
            "unified_value_decimals": unified.decimals,
            "total_feedback_count": unified.feedback_count_string(),
        }),
    );

    Ok(ApplyOutcome::Changed { snapshot_id, unified })
}

/// Fold every stored attestation of an agent on one SATI chain into a summary:
/// mean outcome score (truncated, 0 decimals) over the attestation count.
pub fn summarize_attestations(conn: &Connection, master_agent_id: &str, chain_id: &str) -> IndexResult<ChainReputation> {
    let attestations = list_attestations(conn, master_agent_id, chain_id)?;
    if attestations.is_empty() {
        return Ok(ChainReputation::zero());
    }

    let total: u64 = attestations.iter().map(|a| a.outcome.score()).sum();
    let count = attestations.len() as u64;
    Ok(ChainReputation {
        value: I256::from(total / count),
        decimals: 0,
        feedback_count: U256::from(count),
    })
}

/// Weighted average over every `reputation_latest` row of the agent's
/// linked group, cached onto each member of the group.
pub fn recompute_unified(conn: &Connection, master_agent_id: &str) -> IndexResult<Unified> {
    let group = linked_group(conn, master_agent_id)?;
    let rows = list_latest_for_agents(conn, &group)?;

    let summaries = rows
        .iter()
        .map(ChainSummary::from_row)
        .collect::<Result<Vec<_>, String>>()
        .map_err(IndexError::Arithmetic)?;
    let unified = weighted_average(&summaries).map_err(IndexError::Arithmetic)?;

    let value = unified.value_string();
    let count = unified.feedback_count_string();
    for member in &group {
        set_unified(conn, member, &value, unified.decimals, &count)?;
    }

    log::debug!(
        "[reputation] Unified {} (group of {}, {} chains): {} @{} over {}",
        master_agent_id,
        group.len(),
        rows.len(),
        value,
        unified.decimals,
        count
    );

    Ok(unified)
}
