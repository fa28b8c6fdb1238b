//! Database operations for `reputation_latest` and `reputation_snapshots`

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use reputation_types::{ReputationLatest, ReputationSnapshot};

use super::now;
use crate::db::Database;

/// The triple compared for snapshot change-detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryTriple {
    pub value: String,
    pub decimals: u32,
    pub feedback_count: String,
}

pub fn upsert_latest(
    conn: &Connection,
    master_agent_id: &str,
    chain_id: &str,
    summary: &SummaryTriple,
) -> SqliteResult<()> {
    conn.execute(
        "INSERT INTO reputation_latest (master_agent_id, chain_id, summary_value,
                                        summary_value_decimals, feedback_count, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(master_agent_id, chain_id) DO UPDATE SET
            summary_value = excluded.summary_value,
            summary_value_decimals = excluded.summary_value_decimals,
            feedback_count = excluded.feedback_count,
            updated_at = excluded.updated_at",
        rusqlite::params![
            master_agent_id,
            chain_id,
            summary.value,
            summary.decimals,
            summary.feedback_count,
            now(),
        ],
    )?;
    Ok(())
}

/// Most recent snapshot triple for one (agent, chain) pair
pub fn latest_snapshot(
    conn: &Connection,
    master_agent_id: &str,
    chain_id: &str,
) -> SqliteResult<Option<SummaryTriple>> {
    conn.query_row(
        "SELECT summary_value, summary_value_decimals, feedback_count
         FROM reputation_snapshots
         WHERE master_agent_id = ?1 AND chain_id = ?2
         ORDER BY id DESC LIMIT 1",
        [master_agent_id, chain_id],
        |row| {
            Ok(SummaryTriple {
                value: row.get(0)?,
                decimals: row.get(1)?,
                feedback_count: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn insert_snapshot(
    conn: &Connection,
    master_agent_id: &str,
    chain_id: &str,
    summary: &SummaryTriple,
) -> SqliteResult<i64> {
    conn.execute(
        "INSERT INTO reputation_snapshots (master_agent_id, chain_id, summary_value,
                                           summary_value_decimals, feedback_count, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            master_agent_id,
            chain_id,
            summary.value,
            summary.decimals,
            summary.feedback_count,
            now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Every `reputation_latest` row belonging to any of the given agents
pub fn list_latest_for_agents(conn: &Connection, master_agent_ids: &[String]) -> SqliteResult<Vec<ReputationLatest>> {
    if master_agent_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=master_agent_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT master_agent_id, chain_id, summary_value, summary_value_decimals, feedback_count, updated_at
         FROM reputation_latest WHERE master_agent_id IN ({})
         ORDER BY master_agent_id, chain_id",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(master_agent_ids.iter()), |row| {
            Ok(ReputationLatest {
                master_agent_id: row.get(0)?,
                chain_id: row.get(1)?,
                summary_value: row.get(2)?,
                summary_value_decimals: row.get(3)?,
                feedback_count: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_snapshots(conn: &Connection, master_agent_id: &str, chain_id: &str) -> SqliteResult<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM reputation_snapshots WHERE master_agent_id = ?1 AND chain_id = ?2",
        [master_agent_id, chain_id],
        |row| row.get(0),
    )
}

impl Database {
    pub fn list_reputation_latest(&self, master_agent_id: &str) -> SqliteResult<Vec<ReputationLatest>> {
        list_latest_for_agents(&self.conn(), &[master_agent_id.to_string()])
    }

    /// Snapshot history for one pair, newest first
    pub fn list_snapshots(
        &self,
        master_agent_id: &str,
        chain_id: &str,
        limit: usize,
    ) -> SqliteResult<Vec<ReputationSnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, master_agent_id, chain_id, summary_value, summary_value_decimals,
                    feedback_count, recorded_at
             FROM reputation_snapshots
             WHERE master_agent_id = ?1 AND chain_id = ?2
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![master_agent_id, chain_id, limit.min(1000) as i64],
                |row| {
                    Ok(ReputationSnapshot {
                        id: row.get(0)?,
                        master_agent_id: row.get(1)?,
                        chain_id: row.get(2)?,
                        summary_value: row.get(3)?,
                        summary_value_decimals: row.get(4)?,
                        feedback_count: row.get(5)?,
                        recorded_at: row.get(6)?,
                    })
                },
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tables::agents::upsert_agent;
    use crate::db::test_support::temp_db;

    fn triple(value: &str, decimals: u32, count: &str) -> SummaryTriple {
        SummaryTriple { value: value.to_string(), decimals, feedback_count: count.to_string() }
    }

    #[test]
    fn test_upsert_latest_in_place() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        upsert_latest(&conn, "0xm1", "8453", &triple("80", 0, "10")).unwrap();
        upsert_latest(&conn, "0xm1", "8453", &triple("81", 0, "11")).unwrap();
        upsert_latest(&conn, "0xm1", "1", &triple("5", 1, "1")).unwrap();

        let rows = db.list_reputation_latest("0xm1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].chain_id, "8453");
        assert_eq!(rows[1].summary_value, "81");
        assert_eq!(rows[1].feedback_count, "11");
    }

    #[test]
    fn test_latest_snapshot_is_most_recent() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        upsert_agent(&conn, "0xm1", "0xaaa", 1, "8453").unwrap();
        assert!(latest_snapshot(&conn, "0xm1", "8453").unwrap().is_none());

        insert_snapshot(&conn, "0xm1", "8453", &triple("1", 0, "1")).unwrap();
        insert_snapshot(&conn, "0xm1", "8453", &triple("2", 0, "2")).unwrap();
        assert_eq!(latest_snapshot(&conn, "0xm1", "8453").unwrap(), Some(triple("2", 0, "2")));
        assert_eq!(db.list_snapshots("0xm1", "8453", 10).unwrap().len(), 2);
    }

    #[test]
    fn test_undecodable_latest_row_fails_the_group_read() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        upsert_latest(&conn, "0xm1", "8453", &triple("80", 0, "10")).unwrap();
        conn.execute(
            "INSERT INTO reputation_latest (master_agent_id, chain_id, summary_value, summary_value_decimals,
                                            feedback_count, updated_at)
             VALUES ('0xm1', '1', '5', 'not-a-number', '1', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        assert!(list_latest_for_agents(&conn, &["0xm1".to_string()]).is_err());
    }
}
