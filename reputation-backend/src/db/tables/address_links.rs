//! Database operations for the `address_links` table

use rusqlite::{Connection, Result as SqliteResult};
use reputation_types::AddressLink;

use super::now;
use crate::db::Database;

pub fn insert_address_link(conn: &Connection, link: &AddressLink) -> SqliteResult<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO address_links (master_agent_id, foreign_chain_id, foreign_address,
                                              linked_at, tx_signature, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            link.master_agent_id,
            link.foreign_chain_id,
            link.foreign_address,
            link.linked_at,
            link.tx_signature,
            now(),
        ],
    )?;
    Ok(rows > 0)
}

impl Database {
    pub fn list_address_links(&self, master_agent_id: &str) -> SqliteResult<Vec<AddressLink>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT master_agent_id, foreign_chain_id, foreign_address, linked_at, tx_signature
             FROM address_links WHERE master_agent_id = ?1 ORDER BY linked_at ASC",
        )?;
        let rows = stmt
            .query_map([master_agent_id], |row| {
                Ok(AddressLink {
                    master_agent_id: row.get(0)?,
                    foreign_chain_id: row.get(1)?,
                    foreign_address: row.get(2)?,
                    linked_at: row.get(3)?,
                    tx_signature: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
