//! Per-chain polling loops.
//!
//! Each configured chain gets one task: run a scan cycle from the stored
//! cursor, publish the hooks of every committed batch, then idle for the
//! poll interval. Cancellation is checked between chunks and while idle.

use async_trait::async_trait;
use reputation_types::CursorPosition;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::IndexError;
use crate::evm::{apply_chunk, apply_pending_reads, EvmScanner, EvmSource};
use crate::hooks::{HookBroadcaster, PendingHooks};
use crate::sati::{apply_transaction, SatiScanner, SatiSource};

#[async_trait]
pub trait ChainWorker: Send + Sync {
    /// Log prefix, e.g. `evm:8453`
    fn label(&self) -> String;

    /// One scan from the stored cursor to the chain head
    async fn cycle(&self, cancel: &CancellationToken) -> Result<(), String>;
}

pub struct EvmWorker<S: EvmSource> {
    db: Arc<Database>,
    broadcaster: Arc<HookBroadcaster>,
    scanner: EvmScanner<S>,
}

impl<S: EvmSource> EvmWorker<S> {
    pub fn new(db: Arc<Database>, broadcaster: Arc<HookBroadcaster>, scanner: EvmScanner<S>) -> Self {
        Self { db, broadcaster, scanner }
    }

    /// Summary reads that failed in earlier cycles, before scanning on
    async fn retry_pending_reads(&self) -> Result<(), String> {
        let chain = self.scanner.chain();
        let pending = self
            .db
            .list_pending_reads(&chain.chain_key())
            .map_err(|e| format!("Failed to read pending summaries: {}", e))?;
        if pending.is_empty() {
            return Ok(());
        }

        let reads = self.scanner.read_pending(&pending).await;
        let hooks = self
            .db
            .in_transaction(|tx| {
                let mut hooks = PendingHooks::new();
                let stats = apply_pending_reads(tx, chain, &reads, &mut hooks)?;
                log::info!(
                    "[evm:{}] Retried {} queued summary reads: {} changed, {} still pending",
                    chain.chain_id,
                    pending.len(),
                    stats.reputations_changed,
                    stats.reads_deferred
                );
                Ok::<_, IndexError>(hooks)
            })
            .map_err(|e| e.to_string())?;
        self.broadcaster.publish(hooks);
        Ok(())
    }
}

#[async_trait]
impl<S: EvmSource> ChainWorker for EvmWorker<S> {
    fn label(&self) -> String {
        format!("evm:{}", self.scanner.chain().chain_key())
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<(), String> {
        let chain = self.scanner.chain();
        self.retry_pending_reads().await?;

        let cursor = self
            .db
            .get_cursor(&chain.chain_key())
            .map_err(|e| format!("Failed to read cursor: {}", e))?
            .and_then(|c| c.position.block());

        let report = self
            .scanner
            .scan(cursor, cancel, |batch| {
                let hooks = self
                    .db
                    .in_transaction(|tx| {
                        let mut hooks = PendingHooks::new();
                        let stats = apply_chunk(tx, chain, batch, &mut hooks)?;
                        if stats.agents_created > 0 || stats.reputations_changed > 0 {
                            log::info!(
                                "[evm:{}] Blocks {}..={}: {} new agents, {} reputation changes",
                                chain.chain_id,
                                batch.from,
                                batch.to,
                                stats.agents_created,
                                stats.reputations_changed
                            );
                        }
                        Ok::<_, IndexError>(hooks)
                    })
                    .map_err(|e| e.to_string())?;
                self.broadcaster.publish(hooks);
                Ok(())
            })
            .await?;

        if !report.skipped_blocks.is_empty() {
            log::warn!("[{}] Skipped blocks this cycle: {:?}", self.label(), report.skipped_blocks);
        }
        Ok(())
    }
}

pub struct SatiWorker<S: SatiSource> {
    db: Arc<Database>,
    broadcaster: Arc<HookBroadcaster>,
    scanner: SatiScanner<S>,
}

impl<S: SatiSource> SatiWorker<S> {
    pub fn new(db: Arc<Database>, broadcaster: Arc<HookBroadcaster>, scanner: SatiScanner<S>) -> Self {
        Self { db, broadcaster, scanner }
    }
}

#[async_trait]
impl<S: SatiSource> ChainWorker for SatiWorker<S> {
    fn label(&self) -> String {
        format!("sati:{}", self.scanner.chain().chain_id)
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<(), String> {
        let chain = self.scanner.chain();
        let cursor = self
            .db
            .get_cursor(&chain.chain_id)
            .map_err(|e| format!("Failed to read cursor: {}", e))?
            .and_then(|c| match c.position {
                CursorPosition::Signature { signature, .. } => Some(signature),
                CursorPosition::Block { .. } => None,
            });

        let report = self
            .scanner
            .scan(cursor.as_deref(), cancel, |tx| {
                let hooks = self
                    .db
                    .in_transaction(|conn| {
                        let mut hooks = PendingHooks::new();
                        apply_transaction(conn, chain, tx, &mut hooks)?;
                        Ok::<_, IndexError>(hooks)
                    })
                    .map_err(|e| e.to_string())?;
                self.broadcaster.publish(hooks);
                Ok(())
            })
            .await?;

        if !report.skipped_signatures.is_empty() {
            log::warn!("[{}] Skipped unfetchable transactions: {:?}", self.label(), report.skipped_signatures);
        }
        Ok(())
    }
}

/// Run `worker` until `cancel` fires. A failed cycle is logged and retried
/// after the next poll interval; it never ends the loop.
pub async fn run_loop<W: ChainWorker>(worker: W, poll_interval: Duration, cancel: CancellationToken) {
    let label = worker.label();
    log::info!("[{}] Worker started (poll interval: {:?})", label, poll_interval);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = worker.cycle(&cancel).await {
            log::error!("[{}] Cycle failed: {}", label, e);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    log::info!("[{}] Worker stopped", label);
}
