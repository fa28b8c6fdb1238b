//! Database operations for the `sync_cursors` table
//!
//! One row per chain. Advances are monotonic: a write carrying an older
//! position than the stored one is ignored.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use reputation_types::{CursorPosition, SyncCursor};

use super::now;
use crate::db::Database;

pub fn get_cursor(conn: &Connection, chain_id: &str) -> SqliteResult<Option<SyncCursor>> {
    conn.query_row(
        "SELECT chain_id, last_block, last_slot, last_signature, updated_at
         FROM sync_cursors WHERE chain_id = ?1",
        [chain_id],
        row_to_cursor,
    )
    .optional()
    .map(Option::flatten)
}

/// Returns true if the stored position moved
pub fn advance_block_cursor(conn: &Connection, chain_id: &str, height: u64) -> SqliteResult<bool> {
    let rows = conn.execute(
        "INSERT INTO sync_cursors (chain_id, last_block, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(chain_id) DO UPDATE SET
            last_block = excluded.last_block,
            updated_at = excluded.updated_at
         WHERE sync_cursors.last_block IS NULL OR excluded.last_block > sync_cursors.last_block",
        rusqlite::params![chain_id, height as i64, now()],
    )?;
    Ok(rows > 0)
}

/// Several transactions can share a slot, so an equal slot still advances
pub fn advance_signature_cursor(
    conn: &Connection,
    chain_id: &str,
    slot: u64,
    signature: &str,
) -> SqliteResult<bool> {
    let rows = conn.execute(
        "INSERT INTO sync_cursors (chain_id, last_slot, last_signature, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(chain_id) DO UPDATE SET
            last_slot = excluded.last_slot,
            last_signature = excluded.last_signature,
            updated_at = excluded.updated_at
         WHERE sync_cursors.last_slot IS NULL OR excluded.last_slot >= sync_cursors.last_slot",
        rusqlite::params![chain_id, slot as i64, signature, now()],
    )?;
    Ok(rows > 0)
}

pub fn list_cursors(conn: &Connection) -> SqliteResult<Vec<SyncCursor>> {
    let mut stmt = conn.prepare(
        "SELECT chain_id, last_block, last_slot, last_signature, updated_at
         FROM sync_cursors ORDER BY chain_id",
    )?;
    let cursors = stmt
        .query_map([], row_to_cursor)?
        .filter_map(|r| r.ok().flatten())
        .collect();
    Ok(cursors)
}

fn row_to_cursor(row: &rusqlite::Row) -> rusqlite::Result<Option<SyncCursor>> {
    let last_block: Option<i64> = row.get(1)?;
    let last_slot: Option<i64> = row.get(2)?;
    let last_signature: Option<String> = row.get(3)?;

    let position = match (last_block, last_slot, last_signature) {
        (Some(height), _, _) => CursorPosition::Block { height: height as u64 },
        (None, Some(slot), Some(signature)) => CursorPosition::Signature { slot: slot as u64, signature },
        _ => return Ok(None),
    };

    Ok(Some(SyncCursor {
        chain_id: row.get(0)?,
        position,
        updated_at: row.get(4)?,
    }))
}

impl Database {
    pub fn get_cursor(&self, chain_id: &str) -> SqliteResult<Option<SyncCursor>> {
        get_cursor(&self.conn(), chain_id)
    }

    pub fn list_cursors(&self) -> SqliteResult<Vec<SyncCursor>> {
        list_cursors(&self.conn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn test_block_cursor_is_monotonic() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        assert!(db.get_cursor("8453").unwrap().is_none());

        assert!(advance_block_cursor(&conn, "8453", 100).unwrap());
        assert!(advance_block_cursor(&conn, "8453", 200).unwrap());
        assert!(!advance_block_cursor(&conn, "8453", 150).unwrap());

        let cursor = db.get_cursor("8453").unwrap().unwrap();
        assert_eq!(cursor.position, CursorPosition::Block { height: 200 });
    }

    #[test]
    fn test_signature_cursor_accepts_same_slot() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        advance_signature_cursor(&conn, "solana-devnet", 10, "sigA").unwrap();
        assert!(advance_signature_cursor(&conn, "solana-devnet", 10, "sigB").unwrap());
        assert!(!advance_signature_cursor(&conn, "solana-devnet", 9, "sigC").unwrap());

        let cursor = db.get_cursor("solana-devnet").unwrap().unwrap();
        assert_eq!(
            cursor.position,
            CursorPosition::Signature { slot: 10, signature: "sigB".to_string() }
        );
        assert_eq!(db.list_cursors().unwrap().len(), 1);
    }
}
