//! Resumable, rate-limit tolerant log scanner for one EVM chain.
//!
//! The scanner walks `[cursor + 1, head]` in chunks, decodes registry logs,
//! re-reads the summaries of agents that received feedback in the chunk and
//! hands each chunk to a persist callback. The window only advances after
//! the callback commits, so a crash resumes at the first unwritten chunk.

use ethers::types::{Address, Log, U256};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::abi::{self, RegistryEvent};
use super::retry::{with_retry, ChunkRecovery, ChunkWindow, RetryPolicy, RpcFault};
use super::EvmSource;
use crate::config::EvmChainConfig;
use crate::reputation::ChainReputation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDiscovered {
    pub agent_id: String,
    pub owner_address: String,
    pub agent_uri: Option<String>,
    pub chain_id: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriUpdate {
    pub agent_id: String,
    pub agent_uri: String,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReputation {
    pub agent_id: String,
    pub summary: ChainReputation,
}

/// Everything one chunk `[from, to]` produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkBatch {
    pub from: u64,
    pub to: u64,
    pub discovered: Vec<AgentDiscovered>,
    pub uri_updates: Vec<UriUpdate>,
    pub reads: ReputationReads,
}

/// Outcome of re-reading a set of agents' summaries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReputationReads {
    pub readings: Vec<AgentReputation>,
    /// Reverted reads: the registry holds nothing for these agents
    pub reverted: Vec<String>,
    /// Transient failures, to be read again next cycle
    pub deferred: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub head: u64,
    /// Last block durably processed this cycle
    pub last_processed: Option<u64>,
    pub chunks: usize,
    pub discovered: usize,
    pub skipped_blocks: Vec<u64>,
    pub cancelled: bool,
}

pub struct EvmScanner<S: EvmSource> {
    source: S,
    chain: EvmChainConfig,
    chain_key: String,
    policy: RetryPolicy,
    scan_delay: Duration,
}

impl<S: EvmSource> EvmScanner<S> {
    pub fn new(source: S, chain: EvmChainConfig) -> Self {
        let scan_delay = Duration::from_millis(chain.scan_delay_ms());
        Self {
            chain_key: chain.chain_key(),
            source,
            chain,
            policy: RetryPolicy::standard(),
            scan_delay,
        }
    }

    /// Override retry backoff and inter-chunk delay
    pub fn with_timing(mut self, policy: RetryPolicy, scan_delay: Duration) -> Self {
        self.policy = policy;
        self.scan_delay = scan_delay;
        self
    }

    pub fn chain(&self) -> &EvmChainConfig {
        &self.chain
    }

    fn label(&self) -> String {
        format!("evm:{}", self.chain_key)
    }

    fn addresses(&self) -> Result<Vec<Address>, String> {
        let mut addresses = vec![parse_address(&self.chain.identity_registry)?];
        if let Some(reputation) = &self.chain.reputation_registry {
            addresses.push(parse_address(reputation)?);
        }
        Ok(addresses)
    }

    /// Scan from the block after `cursor` (or the configured start) up to the
    /// current head. `persist` must durably write the batch, cursor included.
    /// Cancellation is honoured between chunks.
    pub async fn scan<F>(&self, cursor: Option<u64>, cancel: &CancellationToken, mut persist: F) -> Result<ScanReport, String>
    where
        F: FnMut(&ChunkBatch) -> Result<(), String>,
    {
        let label = self.label();
        let head = with_retry(&self.policy, &label, || self.source.block_number())
            .await
            .map_err(|f| format!("eth_blockNumber failed after {} attempts: {}", f.attempts, f.message))?;

        let mut start = match cursor {
            Some(last) => last.saturating_add(1).max(self.chain.from_block),
            None => self.chain.from_block,
        };
        let mut report = ScanReport { head, ..Default::default() };
        if start > head {
            return Ok(report);
        }

        let addresses = self.addresses()?;
        let topics = vec![
            *abi::REGISTERED_TOPIC,
            *abi::URI_UPDATED_TOPIC,
            *abi::NEW_FEEDBACK_TOPIC,
            *abi::FEEDBACK_REVOKED_TOPIC,
        ];
        let mut window = ChunkWindow::new(self.chain.chunk_size());

        log::info!("[{}] Scanning blocks {}..={} (chunk {})", label, start, head, window.current());

        while start <= head {
            if cancel.is_cancelled() {
                log::info!("[{}] Cancelled before block {}", label, start);
                report.cancelled = true;
                break;
            }

            let end = window.end(start, head);
            let fetched = with_retry(&self.policy, &label, || {
                self.source.get_logs(&addresses, &topics, start, end)
            })
            .await;

            let batch = match fetched {
                Ok(logs) => {
                    let mut batch = self.decode_chunk(start, end, &logs);
                    let feedback_agents = feedback_agent_ids(&logs);
                    if !feedback_agents.is_empty() {
                        batch.reads = self.read_reputations(&feedback_agents).await;
                    }
                    window.on_success();
                    batch
                }
                Err(failure) => match window.on_exhausted(start, end) {
                    ChunkRecovery::Shrink(size) => {
                        log::warn!(
                            "[{}] Blocks {}..={} failed after {} attempts ({}), shrinking chunk to {}",
                            label,
                            start,
                            end,
                            failure.attempts,
                            failure.message,
                            size
                        );
                        continue;
                    }
                    ChunkRecovery::SkipBlock(block) => {
                        log::error!("[{}] Skipping block {}: {}", label, block, failure.message);
                        report.skipped_blocks.push(block);
                        ChunkBatch { from: block, to: block, ..Default::default() }
                    }
                },
            };

            persist(&batch).map_err(|e| format!("Persisting blocks {}..={} failed: {}", batch.from, batch.to, e))?;

            report.chunks += 1;
            report.discovered += batch.discovered.len();
            report.last_processed = Some(batch.to);
            start = batch.to + 1;

            if start <= head && !self.scan_delay.is_zero() {
                tokio::time::sleep(self.scan_delay).await;
            }
        }

        log::info!(
            "[{}] Cycle done at {:?}/{}: {} chunks, {} agents, {} skipped blocks",
            label,
            report.last_processed,
            head,
            report.chunks,
            report.discovered,
            report.skipped_blocks.len()
        );
        Ok(report)
    }

    fn decode_chunk(&self, from: u64, to: u64, logs: &[Log]) -> ChunkBatch {
        let mut batch = ChunkBatch { from, to, ..Default::default() };

        for log in logs {
            let block_number = log.block_number.map(|b| b.as_u64()).unwrap_or(from);
            match abi::decode_registry_log(log) {
                Some(RegistryEvent::Registered { agent_id, agent_uri, owner }) => {
                    batch.discovered.push(AgentDiscovered {
                        agent_id: agent_id.to_string(),
                        owner_address: format!("{:?}", owner),
                        agent_uri: if agent_uri.is_empty() { None } else { Some(agent_uri) },
                        chain_id: self.chain_key.clone(),
                        block_number,
                    });
                }
                Some(RegistryEvent::UriUpdated { agent_id, agent_uri }) => {
                    batch.uri_updates.push(UriUpdate {
                        agent_id: agent_id.to_string(),
                        agent_uri,
                        block_number,
                    });
                }
                Some(RegistryEvent::FeedbackChanged { .. }) => {}
                None => {
                    log::debug!("[{}] Ignoring undecodable log at block {}", self.label(), block_number);
                }
            }
        }

        batch
    }

    /// Current on-chain summary for each agent. Agents without clients read
    /// as zero. Reverted reads are logged and settled; other failures are
    /// returned as deferred so the caller can queue them.
    pub async fn read_reputations(&self, agent_ids: &[U256]) -> ReputationReads {
        let mut reads = ReputationReads::default();
        let Some(registry) = self.chain.reputation_registry.as_deref() else {
            return reads;
        };
        let label = self.label();
        let registry = match parse_address(registry) {
            Ok(address) => address,
            Err(e) => {
                log::error!("[{}] {}", label, e);
                return reads;
            }
        };

        for agent_id in agent_ids {
            match self.read_reputation(registry, *agent_id).await {
                Ok(summary) => reads.readings.push(AgentReputation { agent_id: agent_id.to_string(), summary }),
                Err((RpcFault::Reverted, message)) => {
                    log::warn!("[{}] Summary read for agent {} reverted, skipping: {}", label, agent_id, message);
                    reads.reverted.push(agent_id.to_string());
                }
                Err((_, message)) => {
                    log::warn!("[{}] Summary read for agent {} failed, retrying next cycle: {}", label, agent_id, message);
                    reads.deferred.push(agent_id.to_string());
                }
            }
        }
        reads
    }

    /// Re-read agents queued by earlier cycles. Ids that do not parse are
    /// reported as reverted so they leave the queue.
    pub async fn read_pending(&self, agent_ids: &[String]) -> ReputationReads {
        let mut parsed = Vec::with_capacity(agent_ids.len());
        let mut invalid = Vec::new();
        for agent_id in agent_ids {
            match U256::from_dec_str(agent_id) {
                Ok(id) => parsed.push(id),
                Err(e) => {
                    log::warn!("[{}] Dropping queued read for invalid agent id {}: {}", self.label(), agent_id, e);
                    invalid.push(agent_id.clone());
                }
            }
        }

        let mut reads = self.read_reputations(&parsed).await;
        reads.reverted.extend(invalid);
        reads
    }

    async fn read_reputation(&self, registry: Address, agent_id: U256) -> Result<ChainReputation, (RpcFault, String)> {
        let label = self.label();

        let raw = with_retry(&self.policy, &label, || self.source.call(registry, abi::encode_get_clients(agent_id)))
            .await
            .map_err(|f| (f.fault, f.message))?;
        if raw.is_empty() {
            return Err((RpcFault::Reverted, "getClients returned no data".to_string()));
        }
        let clients = abi::decode_get_clients(&raw).map_err(|e| (RpcFault::Reverted, e))?;
        if clients.is_empty() {
            return Ok(ChainReputation::zero());
        }

        let raw = with_retry(&self.policy, &label, || {
            self.source.call(registry, abi::encode_get_summary(agent_id, &clients))
        })
        .await
        .map_err(|f| (f.fault, f.message))?;
        if raw.is_empty() {
            return Err((RpcFault::Reverted, "getSummary returned no data".to_string()));
        }
        abi::decode_get_summary(&raw).map_err(|e| (RpcFault::Reverted, e))
    }
}

/// Distinct agents named by feedback logs, in ascending id order
fn feedback_agent_ids(logs: &[Log]) -> Vec<U256> {
    logs.iter()
        .filter_map(abi::decode_registry_log)
        .filter_map(|event| match event {
            RegistryEvent::FeedbackChanged { agent_id } => Some(agent_id),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn parse_address(address: &str) -> Result<Address, String> {
    address
        .parse::<Address>()
        .map_err(|e| format!("Invalid registry address '{}': {}", address, e))
}
