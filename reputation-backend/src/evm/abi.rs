//! ERC-8004 registry ABI: event topics, log decoding and the two
//! reputation view calls.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log, H256, I256, U256};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

use crate::reputation::ChainReputation;

pub const REGISTERED_SIGNATURE: &str = "Registered(uint256,string,address)";
pub const URI_UPDATED_SIGNATURE: &str = "URIUpdated(uint256,string,address)";
pub const NEW_FEEDBACK_SIGNATURE: &str =
    "NewFeedback(uint256,address,uint64,int128,uint8,string,string,string,string,string,bytes32)";
pub const FEEDBACK_REVOKED_SIGNATURE: &str = "FeedbackRevoked(uint256,address,uint64)";

/// keccak256("Registered(uint256,string,address)")
pub const REGISTERED_EVENT_TOPIC: &str = "0xca52e62c367d81bb2e328eb795f7c7ba24afb478408a26c0e201d155c449bc4a";

pub static REGISTERED_TOPIC: Lazy<H256> = Lazy::new(|| event_topic(REGISTERED_SIGNATURE));
pub static URI_UPDATED_TOPIC: Lazy<H256> = Lazy::new(|| event_topic(URI_UPDATED_SIGNATURE));
pub static NEW_FEEDBACK_TOPIC: Lazy<H256> = Lazy::new(|| event_topic(NEW_FEEDBACK_SIGNATURE));
pub static FEEDBACK_REVOKED_TOPIC: Lazy<H256> = Lazy::new(|| event_topic(FEEDBACK_REVOKED_SIGNATURE));

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// A registry log the scanner cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { agent_id: U256, agent_uri: String, owner: Address },
    UriUpdated { agent_id: U256, agent_uri: String },
    /// NewFeedback or FeedbackRevoked: the agent's summary must be re-read
    FeedbackChanged { agent_id: U256 },
}

impl RegistryEvent {
    pub fn agent_id(&self) -> U256 {
        match self {
            RegistryEvent::Registered { agent_id, .. }
            | RegistryEvent::UriUpdated { agent_id, .. }
            | RegistryEvent::FeedbackChanged { agent_id } => *agent_id,
        }
    }
}

/// Decode one log. Returns None for foreign topics and malformed logs.
pub fn decode_registry_log(log: &Log) -> Option<RegistryEvent> {
    let topic0 = *log.topics.first()?;

    if topic0 == *REGISTERED_TOPIC {
        // agentId and owner are indexed, agentURI is in data
        if log.topics.len() < 3 {
            return None;
        }
        let agent_id = U256::from_big_endian(log.topics[1].as_bytes());
        let owner = Address::from_slice(&log.topics[2].as_bytes()[12..]);
        let agent_uri = decode_string(&log.data).unwrap_or_default();
        return Some(RegistryEvent::Registered { agent_id, agent_uri, owner });
    }

    if topic0 == *URI_UPDATED_TOPIC {
        if log.topics.len() < 2 {
            return None;
        }
        let agent_id = U256::from_big_endian(log.topics[1].as_bytes());
        let agent_uri = decode_string(&log.data)?;
        return Some(RegistryEvent::UriUpdated { agent_id, agent_uri });
    }

    if topic0 == *NEW_FEEDBACK_TOPIC || topic0 == *FEEDBACK_REVOKED_TOPIC {
        let agent_id = U256::from_big_endian(log.topics.get(1)?.as_bytes());
        return Some(RegistryEvent::FeedbackChanged { agent_id });
    }

    None
}

fn decode_string(data: &[u8]) -> Option<String> {
    match abi::decode(&[ParamType::String], data).ok()?.into_iter().next()? {
        Token::String(s) => Some(s),
        _ => None,
    }
}

// =====================================================
// Reputation registry view calls
// =====================================================

pub fn encode_get_clients(agent_id: U256) -> Vec<u8> {
    let mut data = selector("getClients(uint256)").to_vec();
    data.extend(abi::encode(&[Token::Uint(agent_id)]));
    data
}

pub fn decode_get_clients(data: &[u8]) -> Result<Vec<Address>, String> {
    let tokens = abi::decode(&[ParamType::Array(Box::new(ParamType::Address))], data)
        .map_err(|e| format!("Failed to decode getClients result: {}", e))?;
    match tokens.into_iter().next() {
        Some(Token::Array(items)) => Ok(items.into_iter().filter_map(|t| t.into_address()).collect()),
        _ => Err("Unexpected getClients result".to_string()),
    }
}

/// getSummary(agentId, clients, tag1, tag2) with empty tags: every feedback counts
pub fn encode_get_summary(agent_id: U256, clients: &[Address]) -> Vec<u8> {
    let mut data = selector("getSummary(uint256,address[],string,string)").to_vec();
    data.extend(abi::encode(&[
        Token::Uint(agent_id),
        Token::Array(clients.iter().map(|a| Token::Address(*a)).collect()),
        Token::String(String::new()),
        Token::String(String::new()),
    ]));
    data
}

/// `(uint64 count, int128 summaryValue, uint8 summaryValueDecimals)`
pub fn decode_get_summary(data: &[u8]) -> Result<ChainReputation, String> {
    let tokens = abi::decode(&[ParamType::Uint(64), ParamType::Int(128), ParamType::Uint(8)], data)
        .map_err(|e| format!("Failed to decode getSummary result: {}", e))?;

    let [Token::Uint(count), Token::Int(raw_value), Token::Uint(decimals)] = tokens.as_slice() else {
        return Err("Unexpected getSummary result".to_string());
    };

    Ok(ChainReputation {
        // int tokens are two's complement in 256 bits
        value: I256::from_raw(*raw_value),
        decimals: decimals.low_u32(),
        feedback_count: *count,
    })
}

#[cfg(test)]
pub(crate) fn registered_log(agent_id: u64, owner: Address, uri: &str, block: u64) -> Log {
    Log {
        topics: vec![*REGISTERED_TOPIC, H256::from_low_u64_be(agent_id), H256::from(owner)],
        data: ethers::types::Bytes::from(abi::encode(&[Token::String(uri.to_string())])),
        block_number: Some(block.into()),
        ..Default::default()
    }
}

#[cfg(test)]
pub(crate) fn feedback_log(agent_id: u64, block: u64) -> Log {
    Log {
        topics: vec![*NEW_FEEDBACK_TOPIC, H256::from_low_u64_be(agent_id), H256::zero()],
        block_number: Some(block.into()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    #[test]
    fn test_registered_topic_matches_known_hash() {
        let known: H256 = REGISTERED_EVENT_TOPIC.parse().unwrap();
        assert_eq!(*REGISTERED_TOPIC, known);
    }

    #[test]
    fn test_decode_registered() {
        let owner: Address = "0xAAAaaaAAAaaaAAAaaaAAAaaaAAAaaaAAAaaaAAAa".parse().unwrap();
        let log = registered_log(42, owner, "ipfs://agent42", 1000);

        match decode_registry_log(&log).unwrap() {
            RegistryEvent::Registered { agent_id, agent_uri, owner: decoded } => {
                assert_eq!(agent_id, U256::from(42));
                assert_eq!(agent_uri, "ipfs://agent42");
                assert_eq!(decoded, owner);
                assert_eq!(format!("{:?}", decoded), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_feedback_and_uri_update() {
        let revoked = Log {
            topics: vec![
                *FEEDBACK_REVOKED_TOPIC,
                H256::from_low_u64_be(7),
                H256::zero(),
                H256::from_low_u64_be(1),
            ],
            ..Default::default()
        };
        assert_eq!(
            decode_registry_log(&revoked),
            Some(RegistryEvent::FeedbackChanged { agent_id: U256::from(7) })
        );

        let updated = Log {
            topics: vec![*URI_UPDATED_TOPIC, H256::from_low_u64_be(7), H256::zero()],
            data: Bytes::from(abi::encode(&[Token::String("https://new".to_string())])),
            ..Default::default()
        };
        assert_eq!(
            decode_registry_log(&updated),
            Some(RegistryEvent::UriUpdated { agent_id: U256::from(7), agent_uri: "https://new".to_string() })
        );
    }

    #[test]
    fn test_foreign_and_truncated_logs_are_ignored() {
        let foreign = Log { topics: vec![H256::repeat_byte(1)], ..Default::default() };
        assert_eq!(decode_registry_log(&foreign), None);

        let truncated = Log { topics: vec![*REGISTERED_TOPIC, H256::zero()], ..Default::default() };
        assert_eq!(decode_registry_log(&truncated), None);

        assert_eq!(decode_registry_log(&Log::default()), None);
    }

    #[test]
    fn test_summary_decodes_negative_values() {
        let raw = abi::encode(&[
            Token::Uint(U256::from(4)),
            Token::Int(I256::from(-25).into_raw()),
            Token::Uint(U256::from(2)),
        ]);
        let summary = decode_get_summary(&raw).unwrap();
        assert_eq!(summary.value, I256::from(-25));
        assert_eq!(summary.decimals, 2);
        assert_eq!(summary.feedback_count, U256::from(4));

        assert!(decode_get_summary(&[]).is_err());
    }

    #[test]
    fn test_get_clients_round_trip_through_abi() {
        let clients = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let encoded = abi::encode(&[Token::Array(clients.iter().map(|a| Token::Address(*a)).collect())]);
        assert_eq!(decode_get_clients(&encoded).unwrap(), clients);

        let call = encode_get_clients(U256::from(9));
        assert_eq!(&call[..4], &selector("getClients(uint256)"));
        assert_eq!(call.len(), 4 + 32);
    }
}
