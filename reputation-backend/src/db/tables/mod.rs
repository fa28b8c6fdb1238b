//! Database table modules - extend Database with domain-specific methods
//!
//! Each module adds free functions over `&Connection` for use inside a cycle
//! transaction, and `impl Database` blocks for standalone reads.

pub mod address_links;      // address_links (SATI cross-chain address declarations)
pub mod agents;             // agents (master identities + unified cache)
pub mod identities;         // agent_identities (chain-local registrations)
pub mod pending_reads;      // pending_reputation_reads (summary reads to retry)
pub mod reputation;         // reputation_latest, reputation_snapshots
pub mod sati_attestations;  // sati_attestations
pub mod status;             // IndexerStatus aggregate counts
pub mod sync_cursors;       // sync_cursors
pub mod wallet_links;       // wallet_links

/// Shared RFC 3339 timestamp for rows written now
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
