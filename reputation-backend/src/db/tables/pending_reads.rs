//! Summary reads that failed transiently and must be retried.
//!
//! A feedback log is consumed when its chunk commits, so an agent whose
//! summary could not be read is queued here in the same transaction and
//! drained at the start of the next cycle.

use rusqlite::{Connection, Result as SqliteResult};

use super::now;
use crate::db::Database;

/// Queue `agent_id` for a re-read; re-queuing keeps the first `queued_at`
pub fn queue_pending_read(conn: &Connection, chain_id: &str, agent_id: &str) -> SqliteResult<bool> {
    let rows = conn.execute(
        "INSERT INTO pending_reputation_reads (chain_id, agent_id, queued_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(chain_id, agent_id) DO NOTHING",
        rusqlite::params![chain_id, agent_id, now()],
    )?;
    Ok(rows > 0)
}

pub fn clear_pending_read(conn: &Connection, chain_id: &str, agent_id: &str) -> SqliteResult<bool> {
    let rows = conn.execute(
        "DELETE FROM pending_reputation_reads WHERE chain_id = ?1 AND agent_id = ?2",
        [chain_id, agent_id],
    )?;
    Ok(rows > 0)
}

/// Oldest first
pub fn list_pending_reads(conn: &Connection, chain_id: &str) -> SqliteResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT agent_id FROM pending_reputation_reads WHERE chain_id = ?1 ORDER BY queued_at ASC, agent_id ASC",
    )?;
    let agent_ids = stmt
        .query_map([chain_id], |row| row.get(0))?
        .collect::<SqliteResult<Vec<String>>>()?;
    Ok(agent_ids)
}

impl Database {
    pub fn list_pending_reads(&self, chain_id: &str) -> SqliteResult<Vec<String>> {
        list_pending_reads(&self.conn(), chain_id)
    }
}
