//! Database operations for the `sati_attestations` table

use rusqlite::{Connection, Result as SqliteResult};
use reputation_types::{AttestationOutcome, SatiAttestation};

use super::now;
use crate::db::Database;

/// Insert keyed by `attestation_address`; re-processing is a no-op.
/// Returns true when the attestation is new.
pub fn insert_attestation(conn: &Connection, chain_id: &str, attestation: &SatiAttestation) -> SqliteResult<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO sati_attestations (master_agent_id, chain_id, attestation_address,
                                                  counterparty, outcome, slot, tx_signature, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            attestation.master_agent_id,
            chain_id,
            attestation.attestation_address,
            attestation.counterparty,
            attestation.outcome.as_str(),
            attestation.slot as i64,
            attestation.tx_signature,
            now(),
        ],
    )?;
    Ok(rows > 0)
}

pub fn list_attestations(conn: &Connection, master_agent_id: &str, chain_id: &str) -> SqliteResult<Vec<SatiAttestation>> {
    let mut stmt = conn.prepare(
        "SELECT master_agent_id, attestation_address, counterparty, outcome, slot, tx_signature
         FROM sati_attestations WHERE master_agent_id = ?1 AND chain_id = ?2
         ORDER BY slot ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([master_agent_id, chain_id], |row| {
            let outcome: String = row.get(3)?;
            let slot: i64 = row.get(4)?;
            Ok(SatiAttestation {
                master_agent_id: row.get(0)?,
                attestation_address: row.get(1)?,
                counterparty: row.get(2)?,
                outcome: AttestationOutcome::parse(&outcome).unwrap_or(AttestationOutcome::Neutral),
                slot: slot as u64,
                tx_signature: row.get(5)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

impl Database {
    pub fn list_attestations_for_agent(&self, master_agent_id: &str, chain_id: &str) -> SqliteResult<Vec<SatiAttestation>> {
        list_attestations(&self.conn(), master_agent_id, chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_db;

    #[test]
    fn test_attestation_address_is_natural_key() {
        let (_dir, db) = temp_db();
        let conn = db.conn();
        let attestation = SatiAttestation {
            master_agent_id: "0xm1".to_string(),
            attestation_address: "Att1".to_string(),
            counterparty: "Cp1".to_string(),
            outcome: AttestationOutcome::Positive,
            slot: 77,
            tx_signature: "sig1".to_string(),
        };
        assert!(insert_attestation(&conn, "solana-devnet", &attestation).unwrap());
        assert!(!insert_attestation(&conn, "solana-devnet", &attestation).unwrap());

        let rows = db.list_attestations_for_agent("0xm1", "solana-devnet").unwrap();
        assert_eq!(rows, vec![attestation]);
    }
}
