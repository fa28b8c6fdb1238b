//! Database operations for the `wallet_links` table

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use reputation_types::WalletLink;

use super::now;
use crate::db::Database;

/// The link an agent participates in, as primary or as linked side
pub fn get_link_for_agent(conn: &Connection, master_agent_id: &str) -> SqliteResult<Option<WalletLink>> {
    conn.query_row(
        "SELECT primary_agent_id, linked_agent_id, created_at FROM wallet_links
         WHERE primary_agent_id = ?1 OR linked_agent_id = ?1",
        [master_agent_id],
        |row| {
            Ok(WalletLink {
                primary_agent_id: row.get(0)?,
                linked_agent_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

pub fn insert_link(conn: &Connection, primary_agent_id: &str, linked_agent_id: &str) -> SqliteResult<WalletLink> {
    let created_at = now();
    conn.execute(
        "INSERT INTO wallet_links (primary_agent_id, linked_agent_id, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![primary_agent_id, linked_agent_id, created_at],
    )?;
    Ok(WalletLink {
        primary_agent_id: primary_agent_id.to_string(),
        linked_agent_id: linked_agent_id.to_string(),
        created_at,
    })
}

pub fn delete_link(conn: &Connection, primary_agent_id: &str, linked_agent_id: &str) -> SqliteResult<bool> {
    let rows = conn.execute(
        "DELETE FROM wallet_links WHERE primary_agent_id = ?1 AND linked_agent_id = ?2",
        [primary_agent_id, linked_agent_id],
    )?;
    Ok(rows > 0)
}

/// The agent plus every identity joined to it through a link
pub fn linked_group(conn: &Connection, master_agent_id: &str) -> SqliteResult<Vec<String>> {
    let mut group = vec![master_agent_id.to_string()];
    if let Some(link) = get_link_for_agent(conn, master_agent_id)? {
        let other = if link.primary_agent_id == master_agent_id {
            link.linked_agent_id
        } else {
            link.primary_agent_id
        };
        group.push(other);
    }
    Ok(group)
}

impl Database {
    pub fn get_link_for_agent(&self, master_agent_id: &str) -> SqliteResult<Option<WalletLink>> {
        get_link_for_agent(&self.conn(), master_agent_id)
    }
}
