//! Shared types for the reputation indexer and the services that read its store.

use serde::{Deserialize, Serialize};

// =====================================================
// Domain Types
// =====================================================

/// One master identity. `unified_*` and `total_feedback_count` are a cache of
/// the weighted average over the agent's linked group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub master_agent_id: String,
    pub owner_address: String,
    pub registered_at: String,
    pub first_seen_block: i64,
    pub first_seen_chain: String,
    /// Signed decimal string
    pub unified_value: String,
    pub unified_value_decimals: u32,
    /// Unsigned decimal string
    pub total_feedback_count: String,
    pub updated_at: String,
}

/// One chain-local registration of an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub master_agent_id: String,
    pub global_agent_id: String,
    pub chain_id: String,
    pub registry_address: String,
    pub l2_agent_id: String,
    pub agent_uri: Option<String>,
    pub discovered_block: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Current per-chain reputation summary for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationLatest {
    pub master_agent_id: String,
    pub chain_id: String,
    pub summary_value: String,
    pub summary_value_decimals: u32,
    pub feedback_count: String,
    pub updated_at: String,
}

/// Immutable history row, written only when the summary changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub id: i64,
    pub master_agent_id: String,
    pub chain_id: String,
    pub summary_value: String,
    pub summary_value_decimals: u32,
    pub feedback_count: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletLink {
    pub primary_agent_id: String,
    pub linked_agent_id: String,
    pub created_at: String,
}

/// Last fully-processed position of one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorPosition {
    Block { height: u64 },
    Signature { slot: u64, signature: String },
}

impl CursorPosition {
    pub fn block(&self) -> Option<u64> {
        match self {
            CursorPosition::Block { height } => Some(*height),
            CursorPosition::Signature { .. } => None,
        }
    }

    pub fn slot(&self) -> Option<u64> {
        match self {
            CursorPosition::Block { .. } => None,
            CursorPosition::Signature { slot, .. } => Some(*slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub chain_id: String,
    pub position: CursorPosition,
    pub updated_at: String,
}

/// Outcome carried by a SATI attestation account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationOutcome {
    Negative,
    Neutral,
    Positive,
}

impl AttestationOutcome {
    /// On-chain tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(AttestationOutcome::Negative),
            1 => Some(AttestationOutcome::Neutral),
            2 => Some(AttestationOutcome::Positive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttestationOutcome::Negative => "negative",
            AttestationOutcome::Neutral => "neutral",
            AttestationOutcome::Positive => "positive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "negative" => Some(AttestationOutcome::Negative),
            "neutral" => Some(AttestationOutcome::Neutral),
            "positive" => Some(AttestationOutcome::Positive),
            _ => None,
        }
    }

    /// Score used when folding attestations into a per-chain summary
    pub fn score(&self) -> u64 {
        match self {
            AttestationOutcome::Negative => 0,
            AttestationOutcome::Neutral => 50,
            AttestationOutcome::Positive => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatiAttestation {
    pub master_agent_id: String,
    pub attestation_address: String,
    pub counterparty: String,
    pub outcome: AttestationOutcome,
    pub slot: u64,
    pub tx_signature: String,
}

/// A foreign-chain address an agent declared on the SATI program.
/// Informational only; merging identities goes through the wallet linker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLink {
    pub master_agent_id: String,
    pub foreign_chain_id: String,
    pub foreign_address: String,
    pub linked_at: i64,
    pub tx_signature: String,
}

// =====================================================
// Hook Types
// =====================================================

pub mod hook_events {
    pub const AGENT_REGISTERED: &str = "agent.registered";
    pub const REPUTATION_CHANGED: &str = "reputation.changed";
    pub const LINK_CREATED: &str = "link.created";
    pub const LINK_REMOVED: &str = "link.removed";
}

/// Event handed to the webhook layer after the triggering write committed.
/// `id` lets receivers drop duplicates of an at-least-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub id: String,
    pub event: String,
    pub master_agent_id: String,
    pub payload: serde_json::Value,
    pub emitted_at: String,
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub agents: i64,
    pub identities: i64,
    pub wallet_links: i64,
    pub snapshots: i64,
    pub attestations: i64,
    pub cursors: Vec<SyncCursor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_tags() {
        assert_eq!(AttestationOutcome::from_tag(0), Some(AttestationOutcome::Negative));
        assert_eq!(AttestationOutcome::from_tag(2), Some(AttestationOutcome::Positive));
        assert_eq!(AttestationOutcome::from_tag(7), None);
        assert_eq!(AttestationOutcome::parse("neutral"), Some(AttestationOutcome::Neutral));
        assert_eq!(AttestationOutcome::Positive.as_str(), "positive");
    }

    #[test]
    fn test_cursor_position_serde() {
        let pos = CursorPosition::Signature { slot: 12, signature: "5abc".to_string() };
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(json["kind"], "signature");
        assert_eq!(json["slot"], 12);
        assert_eq!(pos.slot(), Some(12));
        assert_eq!(pos.block(), None);
    }
}
