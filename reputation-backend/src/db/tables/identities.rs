//! Database operations for the `agent_identities` table

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use reputation_types::AgentIdentity;

use super::now;
use crate::db::Database;

const IDENTITY_COLUMNS: &str = "master_agent_id, global_agent_id, chain_id, registry_address,
    l2_agent_id, agent_uri, discovered_block, created_at, updated_at";

/// Fields of one chain-local registration as observed by a scanner
#[derive(Debug, Clone)]
pub struct NewIdentity<'a> {
    pub master_agent_id: &'a str,
    pub global_agent_id: &'a str,
    pub chain_id: &'a str,
    pub registry_address: &'a str,
    pub l2_agent_id: &'a str,
    pub agent_uri: Option<&'a str>,
    pub discovered_block: u64,
}

/// Insert or refresh an identity keyed by `global_agent_id`.
/// A `None` URI never overwrites a known one. Returns true on insert.
pub fn upsert_identity(conn: &Connection, identity: &NewIdentity) -> SqliteResult<bool> {
    let existed = find_identity(conn, identity.global_agent_id)?.is_some();
    let now = now();
    conn.execute(
        "INSERT INTO agent_identities (master_agent_id, global_agent_id, chain_id, registry_address,
                                       l2_agent_id, agent_uri, discovered_block, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(global_agent_id) DO UPDATE SET
            agent_uri = COALESCE(excluded.agent_uri, agent_identities.agent_uri),
            updated_at = CASE
                WHEN excluded.agent_uri IS NOT NULL
                     AND excluded.agent_uri IS NOT agent_identities.agent_uri
                THEN excluded.updated_at
                ELSE agent_identities.updated_at
            END",
        rusqlite::params![
            identity.master_agent_id,
            identity.global_agent_id,
            identity.chain_id,
            identity.registry_address,
            identity.l2_agent_id,
            identity.agent_uri,
            identity.discovered_block as i64,
            now,
        ],
    )?;
    Ok(!existed)
}

/// Refresh only the metadata pointer of a known identity
pub fn update_agent_uri(conn: &Connection, global_agent_id: &str, agent_uri: &str) -> SqliteResult<bool> {
    let rows = conn.execute(
        "UPDATE agent_identities SET agent_uri = ?1, updated_at = ?2
         WHERE global_agent_id = ?3 AND agent_uri IS NOT ?1",
        rusqlite::params![agent_uri, now(), global_agent_id],
    )?;
    Ok(rows > 0)
}

pub fn find_identity(conn: &Connection, global_agent_id: &str) -> SqliteResult<Option<AgentIdentity>> {
    conn.query_row(
        &format!("SELECT {} FROM agent_identities WHERE global_agent_id = ?1", IDENTITY_COLUMNS),
        [global_agent_id],
        row_to_identity,
    )
    .optional()
}

pub fn list_identities_for_agent(conn: &Connection, master_agent_id: &str) -> SqliteResult<Vec<AgentIdentity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM agent_identities WHERE master_agent_id = ?1 ORDER BY id ASC",
        IDENTITY_COLUMNS
    ))?;
    let identities = stmt
        .query_map([master_agent_id], row_to_identity)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(identities)
}

fn row_to_identity(row: &rusqlite::Row) -> rusqlite::Result<AgentIdentity> {
    Ok(AgentIdentity {
        master_agent_id: row.get(0)?,
        global_agent_id: row.get(1)?,
        chain_id: row.get(2)?,
        registry_address: row.get(3)?,
        l2_agent_id: row.get(4)?,
        agent_uri: row.get(5)?,
        discovered_block: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    pub fn find_identity(&self, global_agent_id: &str) -> SqliteResult<Option<AgentIdentity>> {
        find_identity(&self.conn(), global_agent_id)
    }

    pub fn list_identities_for_agent(&self, master_agent_id: &str) -> SqliteResult<Vec<AgentIdentity>> {
        list_identities_for_agent(&self.conn(), master_agent_id)
    }
}
