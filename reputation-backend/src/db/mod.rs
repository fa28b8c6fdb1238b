//! SQLite store shared by every chain loop and the wallet linker.
//!
//! Table methods live in `tables/`, each adding free functions over a
//! `&Connection` (so they compose inside one transaction) plus
//! `impl Database` readers for the API layer.

pub mod tables;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Result as SqliteResult, Transaction};
use std::path::Path;
use std::time::Duration;

pub type DbConn = PooledConnection<SqliteConnectionManager>;

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let manager = SqliteConnectionManager::file(database_url).with_init(|c| {
            c.busy_timeout(Duration::from_secs(10))?;
            c.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to build pool: {}", e)),
                )
            })?;

        let db = Self { pool };
        db.init()?;
        Ok(db)
    }

    /// Checkout a pooled connection. Pool exhaustion blocks until the
    /// connection timeout, then panics like a poisoned lock would.
    pub fn conn(&self) -> DbConn {
        self.pool.get().expect("database pool exhausted")
    }

    /// Run `f` inside one IMMEDIATE transaction; commits only if `f` succeeds.
    pub fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
        F: FnOnce(&Transaction) -> Result<T, E>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                master_agent_id TEXT PRIMARY KEY,
                owner_address TEXT NOT NULL,
                registered_at TEXT NOT NULL,
                first_seen_block INTEGER NOT NULL,
                first_seen_chain TEXT NOT NULL,
                unified_value TEXT NOT NULL DEFAULT '0',
                unified_value_decimals INTEGER NOT NULL DEFAULT 0,
                total_feedback_count TEXT NOT NULL DEFAULT '0',
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_identities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                master_agent_id TEXT NOT NULL REFERENCES agents(master_agent_id),
                global_agent_id TEXT NOT NULL UNIQUE,
                chain_id TEXT NOT NULL,
                registry_address TEXT NOT NULL,
                l2_agent_id TEXT NOT NULL,
                agent_uri TEXT,
                discovered_block INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_identities_master ON agent_identities(master_agent_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_agent_identities_chain ON agent_identities(chain_id, l2_agent_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wallet_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                primary_agent_id TEXT NOT NULL UNIQUE REFERENCES agents(master_agent_id),
                linked_agent_id TEXT NOT NULL UNIQUE REFERENCES agents(master_agent_id),
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reputation_latest (
                master_agent_id TEXT NOT NULL,
                chain_id TEXT NOT NULL,
                summary_value TEXT NOT NULL,
                summary_value_decimals INTEGER NOT NULL,
                feedback_count TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(master_agent_id, chain_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS reputation_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                master_agent_id TEXT NOT NULL REFERENCES agents(master_agent_id),
                chain_id TEXT NOT NULL,
                summary_value TEXT NOT NULL,
                summary_value_decimals INTEGER NOT NULL,
                feedback_count TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_reputation_snapshots_pair ON reputation_snapshots(master_agent_id, chain_id, id DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_cursors (
                chain_id TEXT PRIMARY KEY,
                last_block INTEGER,
                last_slot INTEGER,
                last_signature TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pending_reputation_reads (
                chain_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                queued_at TEXT NOT NULL,
                PRIMARY KEY (chain_id, agent_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sati_attestations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                master_agent_id TEXT NOT NULL,
                chain_id TEXT NOT NULL,
                attestation_address TEXT NOT NULL UNIQUE,
                counterparty TEXT NOT NULL,
                outcome TEXT NOT NULL,
                slot INTEGER NOT NULL,
                tx_signature TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sati_attestations_agent ON sati_attestations(master_agent_id, chain_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS address_links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                master_agent_id TEXT NOT NULL,
                foreign_chain_id TEXT NOT NULL,
                foreign_address TEXT NOT NULL,
                linked_at INTEGER NOT NULL,
                tx_signature TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(master_agent_id, foreign_chain_id, foreign_address)
            )",
            [],
        )?;

        Ok(())
    }
}
