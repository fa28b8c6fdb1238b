//! Database operations for the `agents` table

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use reputation_types::Agent;

use super::now;
use crate::db::Database;

const AGENT_COLUMNS: &str = "master_agent_id, owner_address, registered_at, first_seen_block,
    first_seen_chain, unified_value, unified_value_decimals, total_feedback_count, updated_at";

/// Create the agent if absent. First-seen fields are never updated.
/// Returns true when a new row was inserted.
pub fn upsert_agent(
    conn: &Connection,
    master_agent_id: &str,
    owner_address: &str,
    first_seen_block: u64,
    first_seen_chain: &str,
) -> SqliteResult<bool> {
    let now = now();
    let rows = conn.execute(
        "INSERT INTO agents (master_agent_id, owner_address, registered_at, first_seen_block,
                             first_seen_chain, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?3)
         ON CONFLICT(master_agent_id) DO NOTHING",
        rusqlite::params![master_agent_id, owner_address, now, first_seen_block as i64, first_seen_chain],
    )?;
    Ok(rows > 0)
}

pub fn get_agent(conn: &Connection, master_agent_id: &str) -> SqliteResult<Option<Agent>> {
    conn.query_row(
        &format!("SELECT {} FROM agents WHERE master_agent_id = ?1", AGENT_COLUMNS),
        [master_agent_id],
        row_to_agent,
    )
    .optional()
}

pub fn agent_exists(conn: &Connection, master_agent_id: &str) -> SqliteResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM agents WHERE master_agent_id = ?1)",
        [master_agent_id],
        |row| row.get(0),
    )
}

/// Overwrite the cached unified reputation
pub fn set_unified(
    conn: &Connection,
    master_agent_id: &str,
    value: &str,
    decimals: u32,
    total_feedback_count: &str,
) -> SqliteResult<()> {
    conn.execute(
        "UPDATE agents SET unified_value = ?1, unified_value_decimals = ?2,
                total_feedback_count = ?3, updated_at = ?4
         WHERE master_agent_id = ?5",
        rusqlite::params![value, decimals, total_feedback_count, now(), master_agent_id],
    )?;
    Ok(())
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        master_agent_id: row.get(0)?,
        owner_address: row.get(1)?,
        registered_at: row.get(2)?,
        first_seen_block: row.get(3)?,
        first_seen_chain: row.get(4)?,
        unified_value: row.get(5)?,
        unified_value_decimals: row.get(6)?,
        total_feedback_count: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    pub fn get_agent(&self, master_agent_id: &str) -> SqliteResult<Option<Agent>> {
        get_agent(&self.conn(), master_agent_id)
    }

    /// Most recently registered agents first
    pub fn list_agents(&self, limit: usize) -> SqliteResult<Vec<Agent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agents ORDER BY registered_at DESC LIMIT ?1",
            AGENT_COLUMNS
        ))?;
        let agents = stmt
            .query_map([limit.min(500) as i64], row_to_agent)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn test_upsert_agent_keeps_first_seen_fields() {
        let (_dir, db) = temp_db();
        let conn = db.conn();

        assert!(upsert_agent(&conn, "0xm1", "0xaaa", 1000, "8453").unwrap());
        assert!(!upsert_agent(&conn, "0xm1", "0xbbb", 2000, "1").unwrap());

        let agent = get_agent(&conn, "0xm1").unwrap().unwrap();
        assert_eq!(agent.owner_address, "0xaaa");
        assert_eq!(agent.first_seen_block, 1000);
        assert_eq!(agent.first_seen_chain, "8453");
        assert_eq!(agent.unified_value, "0");
        assert_eq!(agent.total_feedback_count, "0");
    }

    #[test]
    fn test_set_unified() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        upsert_agent(&conn, "0xm1", "0xaaa", 1, "1").unwrap();
        set_unified(&conn, "0xm1", "-550", 1, "15").unwrap();

        let agent = db.get_agent("0xm1").unwrap().unwrap();
        assert_eq!(agent.unified_value, "-550");
        assert_eq!(agent.unified_value_decimals, 1);
        assert_eq!(agent.total_feedback_count, "15");
        assert!(agent_exists(&conn, "0xm1").unwrap());
        assert!(!agent_exists(&conn, "0xm2").unwrap());
    }
}
