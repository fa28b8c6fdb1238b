//! Signature-driven scanner for one SATI deployment.
//!
//! Each cycle lists every signature newer than the cursor, oldest first, and
//! hands each transaction's decoded events to the persist callback. A
//! transaction and its cursor advance are written together, so a restart
//! resumes exactly after the last committed transaction.

use reputation_types::AttestationOutcome;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::events::{decode_logs, AgentRegistered, AttestationCreated, EvmAddressLinked, SatiEvent};
use super::outcome::resolve_outcome;
use super::{SatiSource, SignatureInfo};
use crate::config::SatiChainConfig;
use crate::evm::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedEvent {
    AgentRegistered(AgentRegistered),
    Attestation {
        event: AttestationCreated,
        outcome: AttestationOutcome,
    },
    AddressLinked(EvmAddressLinked),
}

/// One transaction's worth of writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTransaction {
    pub signature: String,
    pub slot: u64,
    /// Empty for failed or unavailable transactions, which still advance the cursor
    pub events: Vec<ScannedEvent>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SatiScanReport {
    pub signatures: usize,
    pub processed: usize,
    pub failed_skipped: usize,
    pub events: usize,
    /// `(slot, signature)` of the last committed transaction
    pub last: Option<(u64, String)>,
    /// Transactions that could not be fetched after retries; committed
    /// without events so the cursor moves past them
    pub skipped_signatures: Vec<String>,
    pub cancelled: bool,
}

pub struct SatiScanner<S: SatiSource> {
    source: S,
    chain: SatiChainConfig,
    policy: RetryPolicy,
    scan_delay: Duration,
}

impl<S: SatiSource> SatiScanner<S> {
    pub fn new(source: S, chain: SatiChainConfig) -> Self {
        let scan_delay = Duration::from_millis(chain.scan_delay_ms());
        Self {
            source,
            chain,
            policy: RetryPolicy::standard(),
            scan_delay,
        }
    }

    pub fn with_timing(mut self, policy: RetryPolicy, scan_delay: Duration) -> Self {
        self.policy = policy;
        self.scan_delay = scan_delay;
        self
    }

    pub fn chain(&self) -> &SatiChainConfig {
        &self.chain
    }

    fn label(&self) -> String {
        format!("sati:{}", self.chain.chain_id)
    }

    /// Process every transaction after `cursor_signature` (or the configured
    /// start signature). `persist` must write the transaction and its cursor
    /// atomically.
    pub async fn scan<F>(
        &self,
        cursor_signature: Option<&str>,
        cancel: &CancellationToken,
        mut persist: F,
    ) -> Result<SatiScanReport, String>
    where
        F: FnMut(&ScannedTransaction) -> Result<(), String>,
    {
        let label = self.label();
        let until = cursor_signature.or(self.chain.from_signature.as_deref());
        let signatures = self.collect_signatures(until).await?;

        let mut report = SatiScanReport {
            signatures: signatures.len(),
            ..Default::default()
        };
        if signatures.is_empty() {
            return Ok(report);
        }
        log::info!("[{}] {} new signatures after {:?}", label, signatures.len(), until);

        for (i, info) in signatures.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("[{}] Cancelled before {}", label, info.signature);
                report.cancelled = true;
                break;
            }

            let scanned = match self.scan_transaction(info).await {
                Ok(scanned) => scanned,
                Err(e) => {
                    log::error!("[{}] Skipping transaction {}: {}", label, info.signature, e);
                    report.skipped_signatures.push(info.signature.clone());
                    ScannedTransaction {
                        signature: info.signature.clone(),
                        slot: info.slot,
                        events: Vec::new(),
                    }
                }
            };
            if scanned.events.is_empty() && info.err.is_some() {
                report.failed_skipped += 1;
            }

            persist(&scanned).map_err(|e| format!("Persisting {} failed: {}", scanned.signature, e))?;

            report.processed += 1;
            report.events += scanned.events.len();
            report.last = Some((scanned.slot, scanned.signature));

            if i + 1 < signatures.len() && !self.scan_delay.is_zero() {
                tokio::time::sleep(self.scan_delay).await;
            }
        }

        log::info!(
            "[{}] Cycle done: {}/{} transactions, {} events, {} failed skipped, {} unfetchable",
            label,
            report.processed,
            report.signatures,
            report.events,
            report.failed_skipped,
            report.skipped_signatures.len()
        );
        Ok(report)
    }

    /// All signatures newer than `until`, oldest first. The RPC pages
    /// newest-first, so pages are chained with `before` and reversed.
    async fn collect_signatures(&self, until: Option<&str>) -> Result<Vec<SignatureInfo>, String> {
        let label = self.label();
        let limit = self.chain.page_limit();
        let program = self.chain.program_id.as_str();
        let mut all = Vec::new();
        let mut before: Option<String> = None;

        loop {
            let page = with_retry(&self.policy, &label, || {
                self.source.signatures_for_address(program, before.as_deref(), until, limit)
            })
            .await
            .map_err(|f| format!("getSignaturesForAddress failed after {} attempts: {}", f.attempts, f.message))?;

            let full_page = page.len() >= limit;
            before = page.last().map(|s| s.signature.clone());
            all.extend(page);

            if !full_page || before.is_none() {
                break;
            }
        }

        all.reverse();
        Ok(all)
    }

    async fn scan_transaction(&self, info: &SignatureInfo) -> Result<ScannedTransaction, String> {
        let label = self.label();
        let mut scanned = ScannedTransaction {
            signature: info.signature.clone(),
            slot: info.slot,
            events: Vec::new(),
        };

        if info.err.is_some() {
            log::debug!("[{}] Skipping failed transaction {}", label, info.signature);
            return Ok(scanned);
        }

        let tx = with_retry(&self.policy, &label, || self.source.transaction(&info.signature))
            .await
            .map_err(|f| format!("getTransaction: {}", f.message))?;
        let Some(tx) = tx else {
            log::warn!("[{}] Transaction {} unavailable, skipping", label, info.signature);
            return Ok(scanned);
        };
        scanned.slot = tx.slot;
        if tx.failed {
            log::debug!("[{}] Skipping failed transaction {}", label, info.signature);
            return Ok(scanned);
        }

        for event in decode_logs(&label, &tx.log_messages) {
            let event = match event {
                SatiEvent::AgentRegistered(e) => ScannedEvent::AgentRegistered(e),
                SatiEvent::AttestationCreated(e) => {
                    let account = match with_retry(&self.policy, &label, || self.source.account_data(&e.address)).await {
                        Ok(account) => account,
                        Err(f) => {
                            log::warn!(
                                "[{}] getAccountInfo {} failed after {} attempts: {}",
                                label,
                                e.address,
                                f.attempts,
                                f.message
                            );
                            None
                        }
                    };
                    let outcome = resolve_outcome(&label, &e.address, e.storage, account.as_deref());
                    ScannedEvent::Attestation { event: e, outcome }
                }
                SatiEvent::EvmAddressLinked(e) => ScannedEvent::AddressLinked(e),
                SatiEvent::Unknown { .. } => continue,
            };
            scanned.events.push(event);
        }

        Ok(scanned)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::sati::TransactionInfo;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    /// Newest-first signature list, like the real RPC
    #[derive(Default)]
    pub struct ScriptedCluster {
        pub signatures: Vec<SignatureInfo>,
        pub transactions: HashMap<String, TransactionInfo>,
        pub accounts: HashMap<String, Vec<u8>>,
        pub broken_transactions: HashSet<String>,
        pub broken_accounts: HashSet<String>,
        pub pages: Mutex<usize>,
    }

    impl ScriptedCluster {
        /// Add a successful transaction; call oldest first
        pub fn push(&mut self, signature: &str, slot: u64, logs: Vec<String>) {
            self.signatures.insert(0, SignatureInfo { signature: signature.to_string(), slot, err: None });
            self.transactions.insert(
                signature.to_string(),
                TransactionInfo { slot, failed: false, log_messages: logs },
            );
        }

        pub fn push_failed(&mut self, signature: &str, slot: u64) {
            self.signatures.insert(
                0,
                SignatureInfo { signature: signature.to_string(), slot, err: Some(json!({ "InstructionError": [0, "Custom"] })) },
            );
        }
    }

    #[async_trait]
    impl SatiSource for ScriptedCluster {
        async fn signatures_for_address(
            &self,
            _address: &str,
            before: Option<&str>,
            until: Option<&str>,
            limit: usize,
        ) -> Result<Vec<SignatureInfo>, String> {
            *self.pages.lock() += 1;
            let start = match before {
                Some(b) => self.signatures.iter().position(|s| s.signature == b).map(|p| p + 1).unwrap_or(0),
                None => 0,
            };
            Ok(self.signatures[start..]
                .iter()
                .take_while(|s| Some(s.signature.as_str()) != until)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn transaction(&self, signature: &str) -> Result<Option<TransactionInfo>, String> {
            if self.broken_transactions.contains(signature) {
                return Err("RPC error -32000: node is behind".to_string());
            }
            Ok(self.transactions.get(signature).cloned())
        }

        async fn account_data(&self, address: &str) -> Result<Option<Vec<u8>>, String> {
            if self.broken_accounts.contains(address) {
                return Err("Invalid account data: invalid base64".to_string());
            }
            Ok(self.accounts.get(address).cloned())
        }
    }

    pub fn chain_config(page_limit: usize) -> SatiChainConfig {
        SatiChainConfig {
            chain_id: "solana-devnet".to_string(),
            rpc_url: "http://localhost:8899".to_string(),
            program_id: bs58::encode([7u8; 32]).into_string(),
            from_signature: None,
            scan_delay_ms: Some(0),
            page_limit: Some(page_limit),
        }
    }

    pub fn scanner(cluster: ScriptedCluster, page_limit: usize) -> SatiScanner<ScriptedCluster> {
        SatiScanner::new(cluster, chain_config(page_limit)).with_timing(RetryPolicy::immediate(), Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::sati::events::encode;
    use crate::sati::outcome::REGULAR_OUTCOME_OFFSET;

    #[tokio::test]
    async fn test_pages_are_walked_and_processed_oldest_first() {
        let mut cluster = ScriptedCluster::default();
        for i in 0..7 {
            cluster.push(&format!("sig{}", i), 100 + i, vec![]);
        }
        let scanner = scanner(cluster, 3);
        let mut seen = Vec::new();

        let report = scanner
            .scan(None, &CancellationToken::new(), |tx| {
                seen.push(tx.signature.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, (0..7).map(|i| format!("sig{}", i)).collect::<Vec<_>>());
        assert_eq!(report.last, Some((106, "sig6".to_string())));
        // 3 + 3 + 1
        assert_eq!(*scanner.source.pages.lock(), 3);
    }

    #[tokio::test]
    async fn test_resumes_after_cursor_signature() {
        let mut cluster = ScriptedCluster::default();
        for i in 0..5 {
            cluster.push(&format!("sig{}", i), 100 + i, vec![]);
        }
        let scanner = scanner(cluster, 1000);
        let mut seen = Vec::new();

        scanner
            .scan(Some("sig2"), &CancellationToken::new(), |tx| {
                seen.push(tx.signature.clone());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["sig3", "sig4"]);

        let report = scanner.scan(Some("sig4"), &CancellationToken::new(), |_| Ok(())).await.unwrap();
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_failed_transactions_advance_without_events() {
        let mut cluster = ScriptedCluster::default();
        cluster.push("ok1", 10, vec![encode::agent_registered(1, 2, "uri")]);
        cluster.push_failed("bad", 11);
        cluster.push("ok2", 12, vec![]);
        let scanner = scanner(cluster, 1000);
        let mut seen = Vec::new();

        let report = scanner
            .scan(None, &CancellationToken::new(), |tx| {
                seen.push((tx.signature.clone(), tx.events.len()));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![("ok1".to_string(), 1), ("bad".to_string(), 0), ("ok2".to_string(), 0)]
        );
        assert_eq!(report.failed_skipped, 1);
    }

    #[tokio::test]
    async fn test_attestation_outcome_is_read_from_account() {
        let (_, attestation_address) = encode::pubkey(4);
        let mut account = vec![0xFF; 200];
        account[REGULAR_OUTCOME_OFFSET] = 2;

        let mut cluster = ScriptedCluster::default();
        cluster.push(
            "s1",
            10,
            vec![encode::attestation_created(1, 3, 0, 4), encode::attestation_created(1, 3, 0, 5)],
        );
        cluster.accounts.insert(attestation_address.clone(), account);
        let scanner = scanner(cluster, 1000);
        let mut events = Vec::new();

        scanner
            .scan(None, &CancellationToken::new(), |tx| {
                events.extend(tx.events.clone());
                Ok(())
            })
            .await
            .unwrap();

        let outcomes: Vec<_> = events
            .iter()
            .map(|e| match e {
                ScannedEvent::Attestation { event, outcome } => (event.address.clone(), *outcome),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        // the second account does not exist: neutral, not dropped
        assert_eq!(
            outcomes,
            vec![
                (attestation_address, AttestationOutcome::Positive),
                (encode::pubkey(5).1, AttestationOutcome::Neutral),
            ]
        );
    }

    #[tokio::test]
    async fn test_unfetchable_transaction_is_skipped_and_scan_continues() {
        let mut cluster = ScriptedCluster::default();
        cluster.push("s1", 10, vec![]);
        cluster.push("s2", 11, vec![encode::agent_registered(1, 2, "")]);
        cluster.push("s3", 12, vec![encode::agent_registered(3, 2, "")]);
        cluster.broken_transactions.insert("s2".to_string());
        let scanner = scanner(cluster, 1000);
        let mut seen = Vec::new();

        let report = scanner
            .scan(None, &CancellationToken::new(), |tx| {
                seen.push((tx.signature.clone(), tx.events.len()));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![("s1".to_string(), 0), ("s2".to_string(), 0), ("s3".to_string(), 1)]
        );
        assert_eq!(report.skipped_signatures, vec!["s2".to_string()]);
        assert_eq!(report.last, Some((12, "s3".to_string())));

        // the next cycle starts after s3, not at the broken transaction
        let report = scanner.scan(Some("s3"), &CancellationToken::new(), |_| Ok(())).await.unwrap();
        assert_eq!(report.signatures, 0);
    }

    #[tokio::test]
    async fn test_unreadable_attestation_account_defaults_to_neutral() {
        let (_, address) = encode::pubkey(4);
        let mut cluster = ScriptedCluster::default();
        cluster.push("s1", 10, vec![encode::attestation_created(1, 3, 0, 4)]);
        cluster.broken_accounts.insert(address.clone());
        let scanner = scanner(cluster, 1000);
        let mut events = Vec::new();

        let report = scanner
            .scan(None, &CancellationToken::new(), |tx| {
                events.extend(tx.events.clone());
                Ok(())
            })
            .await
            .unwrap();

        assert!(report.skipped_signatures.is_empty());
        assert_eq!(events.len(), 1);
        match &events[0] {
            ScannedEvent::Attestation { event, outcome } => {
                assert_eq!(event.address, address);
                assert_eq!(*outcome, AttestationOutcome::Neutral);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
