//! Aggregate counts for the indexer status view

use rusqlite::Result as SqliteResult;
use reputation_types::IndexerStatus;

use super::sync_cursors::list_cursors;
use crate::db::Database;

impl Database {
    pub fn status(&self) -> SqliteResult<IndexerStatus> {
        let conn = self.conn();
        let count = |table: &str| -> i64 {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap_or(0)
        };

        Ok(IndexerStatus {
            agents: count("agents"),
            identities: count("agent_identities"),
            wallet_links: count("wallet_links"),
            snapshots: count("reputation_snapshots"),
            attestations: count("sati_attestations"),
            cursors: list_cursors(&conn)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::tables::{agents::upsert_agent, sync_cursors::advance_block_cursor};
    use crate::db::test_support::temp_db;

    #[test]
    fn test_status_counts() {
        let (_dir, db) = temp_db();
        {
            let conn = db.conn();
            upsert_agent(&conn, "0xm1", "0xaaa", 1, "1").unwrap();
            advance_block_cursor(&conn, "1", 5).unwrap();
        }
        let status = db.status().unwrap();
        assert_eq!(status.agents, 1);
        assert_eq!(status.identities, 0);
        assert_eq!(status.cursors.len(), 1);
    }
}
