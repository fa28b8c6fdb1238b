//! Wallet linker: merges two master identities into one reputation group.
//!
//! Ownership proofs are checked by the caller. The linker enforces the link
//! invariants (no self links, one link per identity) and serializes
//! link/unlink per identity so a read-check-write never interleaves with
//! another operation on the same agent.

use chrono::DateTime;
use dashmap::DashMap;
use parking_lot::Mutex;
use reputation_types::{hook_events, Agent, WalletLink};
use rusqlite::Connection;
use serde_json::json;
use std::cmp::Ordering;
use std::sync::Arc;
use thiserror::Error;

use crate::db::tables::agents::get_agent;
use crate::db::tables::wallet_links::{delete_link, get_link_for_agent, insert_link};
use crate::db::Database;
use crate::error::IndexError;
use crate::hooks::{HookBroadcaster, PendingHooks};
use crate::reputation::recompute_unified;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot link agent to itself")]
    SameAgent,
    #[error("agent {0} is already linked")]
    AlreadyLinked(String),
    #[error("unknown agent {0}")]
    UnknownAgent(String),
    #[error("agent {0} is not linked")]
    NotLinked(String),
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("reputation arithmetic: {0}")]
    Arithmetic(String),
}

impl From<IndexError> for LinkError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Store(e) => LinkError::Store(e),
            IndexError::Arithmetic(msg) => LinkError::Arithmetic(msg),
        }
    }
}

pub struct WalletLinker {
    db: Arc<Database>,
    broadcaster: Arc<HookBroadcaster>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WalletLinker {
    pub fn new(db: Arc<Database>, broadcaster: Arc<HookBroadcaster>) -> Self {
        Self {
            db,
            broadcaster,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, master_agent_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(master_agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock handles for both ids in sorted order, so two operations on the
    /// same pair always acquire in the same order
    fn pair_locks(&self, a: &str, b: &str) -> (Arc<Mutex<()>>, Arc<Mutex<()>>) {
        if a <= b {
            (self.lock_for(a), self.lock_for(b))
        } else {
            (self.lock_for(b), self.lock_for(a))
        }
    }

    /// Link two agents. The earlier-registered one becomes primary and the
    /// group's unified reputation is recomputed before this returns.
    pub fn link(&self, agent_a: &str, agent_b: &str) -> Result<WalletLink, LinkError> {
        if agent_a == agent_b {
            return Err(LinkError::SameAgent);
        }

        let (first, second) = self.pair_locks(agent_a, agent_b);
        let _first = first.lock();
        let _second = second.lock();

        let (link, hooks) = self.db.in_transaction(|tx| {
            let a = require_agent(tx, agent_a)?;
            let b = require_agent(tx, agent_b)?;
            for id in [agent_a, agent_b] {
                if get_link_for_agent(tx, id)?.is_some() {
                    return Err(LinkError::AlreadyLinked(id.to_string()));
                }
            }

            let (primary, linked) = match registered_earlier(&a, &b) {
                Ordering::Greater => (&b, &a),
                _ => (&a, &b),
            };
            let link = insert_link(tx, &primary.master_agent_id, &linked.master_agent_id)?;
            let unified = recompute_unified(tx, &primary.master_agent_id)?;

            let mut hooks = PendingHooks::new();
            hooks.push(
                hook_events::LINK_CREATED,
                &link.primary_agent_id,
                json!({
                    "primary_agent_id": link.primary_agent_id,
                    "linked_agent_id": link.linked_agent_id,
                    "unified_value": unified.value_string(),
                    "unified_value_decimals": unified.decimals,
                    "total_feedback_count": unified.feedback_count_string(),
                }),
            );
            Ok::<_, LinkError>((link, hooks))
        })?;

        log::info!("[linker] Linked {} -> primary {}", link.linked_agent_id, link.primary_agent_id);
        self.broadcaster.publish(hooks);
        Ok(link)
    }

    /// Remove the link `master_agent_id` takes part in, on either side, and
    /// re-unify both agents over their own chains.
    pub fn unlink(&self, master_agent_id: &str) -> Result<WalletLink, LinkError> {
        loop {
            let current = self
                .db
                .get_link_for_agent(master_agent_id)?
                .ok_or_else(|| LinkError::NotLinked(master_agent_id.to_string()))?;

            let (first, second) = self.pair_locks(&current.primary_agent_id, &current.linked_agent_id);
            let _first = first.lock();
            let _second = second.lock();

            let removed = self.db.in_transaction(|tx| {
                // the link may have changed before the locks were taken
                match get_link_for_agent(tx, master_agent_id)? {
                    Some(link)
                        if link.primary_agent_id == current.primary_agent_id
                            && link.linked_agent_id == current.linked_agent_id => {}
                    Some(_) => return Ok(None),
                    None => return Err(LinkError::NotLinked(master_agent_id.to_string())),
                }

                delete_link(tx, &current.primary_agent_id, &current.linked_agent_id)?;
                let primary = recompute_unified(tx, &current.primary_agent_id)?;
                let linked = recompute_unified(tx, &current.linked_agent_id)?;

                let mut hooks = PendingHooks::new();
                hooks.push(
                    hook_events::LINK_REMOVED,
                    &current.primary_agent_id,
                    json!({
                        "primary_agent_id": current.primary_agent_id,
                        "linked_agent_id": current.linked_agent_id,
                        "primary_unified_value": primary.value_string(),
                        "primary_unified_value_decimals": primary.decimals,
                        "linked_unified_value": linked.value_string(),
                        "linked_unified_value_decimals": linked.decimals,
                    }),
                );
                Ok::<_, LinkError>(Some(hooks))
            })?;

            if let Some(hooks) = removed {
                log::info!(
                    "[linker] Unlinked {} from primary {}",
                    current.linked_agent_id,
                    current.primary_agent_id
                );
                self.broadcaster.publish(hooks);
                return Ok(current);
            }
            log::debug!("[linker] Link of {} changed concurrently, retrying", master_agent_id);
        }
    }
}

fn require_agent(conn: &Connection, master_agent_id: &str) -> Result<Agent, LinkError> {
    get_agent(conn, master_agent_id)?.ok_or_else(|| LinkError::UnknownAgent(master_agent_id.to_string()))
}

/// Compare by registration time, then master id so ties are deterministic.
/// `registered_at` is when the indexer first stored the agent: block heights
/// and slots are chain-local, so it is the only clock shared by both sides.
fn registered_earlier(a: &Agent, b: &Agent) -> Ordering {
    let time = |agent: &Agent| DateTime::parse_from_rfc3339(&agent.registered_at).ok();
    match (time(a), time(b)) {
        (Some(ta), Some(tb)) if ta != tb => ta.cmp(&tb),
        _ => a.master_agent_id.cmp(&b.master_agent_id),
    }
}
