//! SATI program events.
//!
//! Anchor emits each event as a `Program data: <base64>` log line whose
//! payload is an 8-byte discriminator (`sha256("event:<Name>")[..8]`)
//! followed by the Borsh-encoded fields.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentRegistered,
    AttestationCreated,
    EvmAddressLinked,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered => "AgentRegistered",
            EventKind::AttestationCreated => "AttestationCreated",
            EventKind::EvmAddressLinked => "EvmAddressLinked",
        }
    }
}

pub fn discriminator(event_name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("event:{}", event_name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

static DISCRIMINATORS: Lazy<HashMap<[u8; 8], EventKind>> = Lazy::new(|| {
    [EventKind::AgentRegistered, EventKind::AttestationCreated, EventKind::EvmAddressLinked]
        .into_iter()
        .map(|kind| (discriminator(kind.name()), kind))
        .collect()
});

/// How the attestation account stores its data; selects the outcome offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Regular,
    Compressed,
    Other(u8),
}

impl From<u8> for StorageKind {
    fn from(tag: u8) -> Self {
        match tag {
            0 => StorageKind::Regular,
            1 => StorageKind::Compressed,
            other => StorageKind::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRegistered {
    pub mint: String,
    pub owner: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationCreated {
    pub schema: String,
    pub agent_mint: String,
    pub counterparty: String,
    pub storage: StorageKind,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmAddressLinked {
    pub agent_mint: String,
    /// 0x-prefixed, lower-case
    pub evm_address: String,
    /// CAIP-2 style, e.g. `eip155:8453`
    pub chain_id: String,
    pub linked_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatiEvent {
    AgentRegistered(AgentRegistered),
    AttestationCreated(AttestationCreated),
    EvmAddressLinked(EvmAddressLinked),
    Unknown { discriminator: [u8; 8] },
}

/// Decode every event in a transaction's log messages, in log order.
/// Lines that are not program data, or whose payload is malformed, are
/// skipped with a warning.
pub fn decode_logs(label: &str, logs: &[String]) -> Vec<SatiEvent> {
    let mut events = Vec::new();
    for line in logs {
        let Some(encoded) = line.strip_prefix(PROGRAM_DATA_PREFIX) else {
            continue;
        };
        let data = match BASE64.decode(encoded.trim()) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[{}] Undecodable program data: {}", label, e);
                continue;
            }
        };
        match decode_event(&data) {
            Ok(SatiEvent::Unknown { discriminator }) => {
                log::debug!("[{}] Ignoring unknown event {}", label, hex::encode(discriminator));
            }
            Ok(event) => events.push(event),
            Err(e) => log::warn!("[{}] Malformed event payload: {}", label, e),
        }
    }
    events
}

pub fn decode_event(data: &[u8]) -> Result<SatiEvent, String> {
    if data.len() < 8 {
        return Err(format!("payload of {} bytes has no discriminator", data.len()));
    }
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&data[..8]);

    let Some(kind) = DISCRIMINATORS.get(&disc) else {
        return Ok(SatiEvent::Unknown { discriminator: disc });
    };

    let mut reader = BorshReader::new(&data[8..]);
    let event = match kind {
        EventKind::AgentRegistered => SatiEvent::AgentRegistered(AgentRegistered {
            mint: reader.pubkey()?,
            owner: reader.pubkey()?,
            uri: reader.string()?,
        }),
        EventKind::AttestationCreated => SatiEvent::AttestationCreated(AttestationCreated {
            schema: reader.pubkey()?,
            agent_mint: reader.pubkey()?,
            counterparty: reader.pubkey()?,
            storage: StorageKind::from(reader.u8()?),
            address: reader.pubkey()?,
        }),
        EventKind::EvmAddressLinked => SatiEvent::EvmAddressLinked(EvmAddressLinked {
            agent_mint: reader.pubkey()?,
            evm_address: format!("0x{}", hex::encode(reader.bytes(20)?)),
            chain_id: reader.string()?,
            linked_at: reader.i64()?,
        }),
    };
    Ok(event)
}

/// Little-endian Borsh cursor over an event payload
struct BorshReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BorshReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("read of {} bytes at offset {} past end ({})", len, self.pos, self.data.len()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64, String> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn pubkey(&mut self) -> Result<String, String> {
        Ok(bs58::encode(self.bytes(32)?).into_string())
    }

    fn string(&mut self) -> Result<String, String> {
        let len = self.u32()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| format!("invalid utf-8 string: {}", e))
    }
}

#[cfg(test)]
pub(crate) mod encode {
    //! Borsh encoders for building test log lines

    use super::*;

    pub fn pubkey(seed: u8) -> ([u8; 32], String) {
        let raw = [seed; 32];
        (raw, bs58::encode(raw).into_string())
    }

    fn string(out: &mut Vec<u8>, s: &str) {
        out.extend((s.len() as u32).to_le_bytes());
        out.extend(s.as_bytes());
    }

    pub fn log_line(kind: EventKind, body: &[u8]) -> String {
        let mut data = discriminator(kind.name()).to_vec();
        data.extend(body);
        format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(data))
    }

    pub fn agent_registered(mint: u8, owner: u8, uri: &str) -> String {
        let mut body = Vec::new();
        body.extend(pubkey(mint).0);
        body.extend(pubkey(owner).0);
        string(&mut body, uri);
        log_line(EventKind::AgentRegistered, &body)
    }

    pub fn attestation_created(agent_mint: u8, counterparty: u8, storage: u8, address: u8) -> String {
        let mut body = Vec::new();
        body.extend(pubkey(0xEE).0);
        body.extend(pubkey(agent_mint).0);
        body.extend(pubkey(counterparty).0);
        body.push(storage);
        body.extend(pubkey(address).0);
        log_line(EventKind::AttestationCreated, &body)
    }

    pub fn evm_address_linked(agent_mint: u8, evm_address: [u8; 20], chain_id: &str, linked_at: i64) -> String {
        let mut body = Vec::new();
        body.extend(pubkey(agent_mint).0);
        body.extend(evm_address);
        string(&mut body, chain_id);
        body.extend(linked_at.to_le_bytes());
        log_line(EventKind::EvmAddressLinked, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::encode::*;
    use super::*;

    #[test]
    fn test_discriminators_are_distinct() {
        assert_eq!(DISCRIMINATORS.len(), 3);
        assert_eq!(discriminator("AgentRegistered").len(), 8);
        assert_ne!(discriminator("AgentRegistered"), discriminator("AttestationCreated"));
    }

    #[test]
    fn test_decode_all_three_kinds_in_log_order() {
        let logs = vec![
            "Program SATi11111111111111111111111111111111111 invoke [1]".to_string(),
            agent_registered(1, 2, "https://agent.example/1.json"),
            attestation_created(1, 3, 0, 4),
            evm_address_linked(1, [0xAB; 20], "eip155:8453", 1_700_000_000),
            "Program SATi11111111111111111111111111111111111 success".to_string(),
        ];

        let events = decode_logs("test", &logs);
        assert_eq!(events.len(), 3);

        assert_eq!(
            events[0],
            SatiEvent::AgentRegistered(AgentRegistered {
                mint: pubkey(1).1,
                owner: pubkey(2).1,
                uri: "https://agent.example/1.json".to_string(),
            })
        );
        match &events[1] {
            SatiEvent::AttestationCreated(a) => {
                assert_eq!(a.agent_mint, pubkey(1).1);
                assert_eq!(a.counterparty, pubkey(3).1);
                assert_eq!(a.storage, StorageKind::Regular);
                assert_eq!(a.address, pubkey(4).1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events[2],
            SatiEvent::EvmAddressLinked(EvmAddressLinked {
                agent_mint: pubkey(1).1,
                evm_address: format!("0x{}", "ab".repeat(20)),
                chain_id: "eip155:8453".to_string(),
                linked_at: 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_unknown_discriminator_is_reported_not_rejected() {
        let data = [9u8; 40];
        assert_eq!(decode_event(&data), Ok(SatiEvent::Unknown { discriminator: [9u8; 8] }));

        let line = format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(data));
        assert!(decode_logs("test", &[line]).is_empty());
    }

    #[test]
    fn test_truncated_payload_is_skipped() {
        let mut full = BASE64.decode(agent_registered(1, 2, "uri").trim_start_matches(PROGRAM_DATA_PREFIX)).unwrap();
        full.truncate(8 + 40);
        assert!(decode_event(&full).is_err());

        let line = format!("{}{}", PROGRAM_DATA_PREFIX, BASE64.encode(&full));
        let garbage = format!("{}not base64!", PROGRAM_DATA_PREFIX);
        assert!(decode_logs("test", &[line, garbage]).is_empty());
    }
}
