//! Recovery policy for EVM RPC calls.
//!
//! Two independent axes:
//! - `with_retry`: per-call attempts, with exponential backoff on rate limits
//!   and no retry at all on reverts.
//! - `ChunkWindow`: the log-scan chunk size, halved when a chunk exhausts its
//!   attempts and doubled back toward the preferred size after each success.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcFault {
    /// 429 / provider throttling; back off before retrying
    RateLimited,
    /// Execution reverted or no data; retrying cannot help
    Reverted,
    /// Timeouts, 5xx, oversized ranges and everything else
    Transient,
}

const RATE_LIMIT_MARKERS: [&str; 5] = ["429", "too many requests", "capacity", "throttled", "rate limit"];
const REVERT_MARKERS: [&str; 3] = ["execution reverted", "revert", "invalid opcode"];

pub fn classify_rpc_error(message: &str) -> RpcFault {
    let lower = message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        RpcFault::RateLimited
    } else if REVERT_MARKERS.iter().any(|m| lower.contains(m)) {
        RpcFault::Reverted
    } else {
        RpcFault::Transient
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// First rate-limit backoff; doubles per attempt
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// 3 attempts, 1s / 2s / 4s backoff on rate limits
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }

    /// Same attempt budget without sleeping
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::ZERO,
        }
    }

    /// Backoff after the given (1-based) failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// The last error of a call that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFailure {
    pub fault: RpcFault,
    pub message: String,
    pub attempts: u32,
}

/// Run `op` until it succeeds, reverts, or the attempt budget is spent.
/// Every rate-limited failure sleeps its backoff, including the last one,
/// so the caller's next move (a smaller chunk) starts after the full wait.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, RpcFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let message = match op().await {
            Ok(value) => return Ok(value),
            Err(message) => message,
        };

        let fault = classify_rpc_error(&message);
        match fault {
            RpcFault::Reverted => {
                return Err(RpcFailure { fault, message, attempts: attempt });
            }
            RpcFault::RateLimited => {
                let wait = policy.backoff(attempt);
                log::warn!(
                    "[{}] Rate limited (attempt {}/{}), backing off {:?}: {}",
                    label,
                    attempt,
                    max_attempts,
                    wait,
                    message
                );
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
            }
            RpcFault::Transient => {
                log::warn!("[{}] Attempt {}/{} failed: {}", label, attempt, max_attempts, message);
            }
        }

        if attempt >= max_attempts {
            return Err(RpcFailure { fault, message, attempts: attempt });
        }
    }
}

/// What to do with a chunk whose attempts are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRecovery {
    /// Retry the same start with this many blocks
    Shrink(u64),
    /// Single block still failing: skip it and move on
    SkipBlock(u64),
}

/// Adaptive chunk size for log scans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    preferred: u64,
    current: u64,
}

impl ChunkWindow {
    pub fn new(preferred: u64) -> Self {
        let preferred = preferred.max(1);
        Self { preferred, current: preferred }
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn preferred(&self) -> u64 {
        self.preferred
    }

    /// Inclusive end of the next chunk starting at `start`, clamped to `head`
    pub fn end(&self, start: u64, head: u64) -> u64 {
        start.saturating_add(self.current - 1).min(head)
    }

    pub fn on_success(&mut self) {
        if self.current < self.preferred {
            self.current = self.current.saturating_mul(2).min(self.preferred);
        }
    }

    /// `[from, to]` failed after every attempt
    pub fn on_exhausted(&mut self, from: u64, to: u64) -> ChunkRecovery {
        let span = to - from + 1;
        if span <= 1 {
            return ChunkRecovery::SkipBlock(from);
        }
        // halve what was actually requested, so a chunk clamped by the head still shrinks
        self.current = (self.current.min(span) / 2).max(1);
        ChunkRecovery::Shrink(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_classify_rpc_error() {
        assert_eq!(classify_rpc_error("RPC error (429 Too Many Requests) for eth_getLogs: slow down"), RpcFault::RateLimited);
        assert_eq!(classify_rpc_error("RPC error -32005: exceeded capacity"), RpcFault::RateLimited);
        assert_eq!(classify_rpc_error("request throttled"), RpcFault::RateLimited);
        assert_eq!(classify_rpc_error("RPC error 3: execution reverted (\"0x\")"), RpcFault::Reverted);
        assert_eq!(classify_rpc_error("RPC error -32602: query returned more than 10000 results"), RpcFault::Transient);
        assert_eq!(classify_rpc_error("eth_getLogs request failed: operation timed out"), RpcFault::Transient);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::standard();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::immediate().backoff(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::immediate(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 { Err("timeout".to_string()) } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_three_rate_limits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("429 too many requests".to_string()) }
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.fault, RpcFault::RateLimited);
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_revert_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::immediate(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("execution reverted".to_string()) }
        })
        .await;
        assert_eq!(result.unwrap_err().fault, RpcFault::Reverted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_shrinks_then_grows_back_to_preferred() {
        let mut window = ChunkWindow::new(2000);
        assert_eq!(window.end(1, 100_000), 2000);

        assert_eq!(window.on_exhausted(1, 2000), ChunkRecovery::Shrink(1000));
        assert_eq!(window.on_exhausted(1, 1000), ChunkRecovery::Shrink(500));
        assert_eq!(window.current(), 500);

        let mut sizes = Vec::new();
        for _ in 0..5 {
            window.on_success();
            sizes.push(window.current());
        }
        assert_eq!(sizes, vec![1000, 2000, 2000, 2000, 2000]);
        assert!(sizes.iter().all(|s| *s <= window.preferred()));
    }

    #[test]
    fn test_window_growth_is_capped_for_non_power_of_two() {
        let mut window = ChunkWindow::new(300);
        window.on_exhausted(0, 299);
        window.on_exhausted(0, 149);
        assert_eq!(window.current(), 75);
        window.on_success();
        window.on_success();
        assert_eq!(window.current(), 300);
    }

    #[test]
    fn test_window_floor_is_one_block_then_skip() {
        let mut window = ChunkWindow::new(4);
        assert_eq!(window.on_exhausted(10, 13), ChunkRecovery::Shrink(2));
        assert_eq!(window.on_exhausted(10, 11), ChunkRecovery::Shrink(1));
        assert_eq!(window.end(10, 50), 10);
        assert_eq!(window.on_exhausted(10, 10), ChunkRecovery::SkipBlock(10));
        assert_eq!(window.current(), 1);
    }

    #[test]
    fn test_window_clamped_chunk_still_shrinks() {
        // 3 blocks left before head with a 2000-block window
        let mut window = ChunkWindow::new(2000);
        assert_eq!(window.end(98, 100), 100);
        assert_eq!(window.on_exhausted(98, 100), ChunkRecovery::Shrink(1));
    }
}
