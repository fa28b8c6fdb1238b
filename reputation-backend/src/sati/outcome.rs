//! Attestation outcome lookup.
//!
//! The outcome is not part of the `AttestationCreated` event. It is the first
//! byte of the attestation's data inside the attestation account, and where
//! that data starts depends on how the schema stores attestations.

use reputation_types::AttestationOutcome;

use super::events::StorageKind;

/// discriminator (1) + nonce, credential, schema (3 x 32) + data length (4)
pub const REGULAR_OUTCOME_OFFSET: usize = 101;
/// Regular layout plus a 32-byte signer ahead of the data
pub const COMPRESSED_OUTCOME_OFFSET: usize = 133;

/// Offsets to try, most likely first for the given storage kind
fn candidate_offsets(storage: StorageKind) -> [usize; 2] {
    match storage {
        StorageKind::Compressed => [COMPRESSED_OUTCOME_OFFSET, REGULAR_OUTCOME_OFFSET],
        StorageKind::Regular | StorageKind::Other(_) => [REGULAR_OUTCOME_OFFSET, COMPRESSED_OUTCOME_OFFSET],
    }
}

/// Read the outcome tag from raw account data. Falls back to neutral (with a
/// warning) when the account is missing or neither offset holds a valid tag.
pub fn resolve_outcome(label: &str, address: &str, storage: StorageKind, account: Option<&[u8]>) -> AttestationOutcome {
    let Some(data) = account else {
        log::warn!("[{}] Attestation account {} not found, recording neutral outcome", label, address);
        return AttestationOutcome::Neutral;
    };

    for offset in candidate_offsets(storage) {
        if let Some(outcome) = data.get(offset).copied().and_then(AttestationOutcome::from_tag) {
            return outcome;
        }
    }

    log::warn!(
        "[{}] No valid outcome tag in attestation {} ({} bytes, {:?}), recording neutral outcome",
        label,
        address,
        data.len(),
        storage
    );
    AttestationOutcome::Neutral
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with(offset: usize, tag: u8, len: usize) -> Vec<u8> {
        let mut data = vec![0xFF; len];
        data[offset] = tag;
        data
    }

    #[test]
    fn test_regular_layout() {
        let data = account_with(REGULAR_OUTCOME_OFFSET, 2, 200);
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Regular, Some(&data)),
            AttestationOutcome::Positive
        );
    }

    #[test]
    fn test_compressed_layout_prefers_its_own_offset() {
        // both offsets hold valid tags; storage kind decides
        let mut data = account_with(REGULAR_OUTCOME_OFFSET, 2, 200);
        data[COMPRESSED_OUTCOME_OFFSET] = 0;
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Compressed, Some(&data)),
            AttestationOutcome::Negative
        );
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Regular, Some(&data)),
            AttestationOutcome::Positive
        );
    }

    #[test]
    fn test_falls_back_to_second_offset() {
        // regular-kind account that only has a valid tag at the other offset
        let data = account_with(COMPRESSED_OUTCOME_OFFSET, 0, 200);
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Regular, Some(&data)),
            AttestationOutcome::Negative
        );
    }

    #[test]
    fn test_unreadable_defaults_to_neutral() {
        let garbage = vec![0xFF; 200];
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Regular, Some(&garbage)),
            AttestationOutcome::Neutral
        );
        assert_eq!(
            resolve_outcome("t", "a", StorageKind::Compressed, Some(&[0u8; 10])),
            AttestationOutcome::Neutral
        );
        assert_eq!(resolve_outcome("t", "a", StorageKind::Regular, None), AttestationOutcome::Neutral);
    }
}
