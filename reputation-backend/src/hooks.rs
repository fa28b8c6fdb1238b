//! Outbound events for the webhook layer.
//!
//! Writers collect events in `PendingHooks` while their transaction is open and
//! publish them only after commit. Delivery and retry belong to the receiver.

use dashmap::DashMap;
use reputation_types::HookEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Events produced by one write batch, not yet published
#[derive(Debug, Default)]
pub struct PendingHooks {
    events: Vec<HookEvent>,
}

impl PendingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &str, master_agent_id: &str, payload: Value) {
        self.events.push(HookEvent {
            id: Uuid::new_v4().to_string(),
            event: event.to_string(),
            master_agent_id: master_agent_id.to_string(),
            payload,
            emitted_at: chrono::Utc::now().to_rfc3339(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[HookEvent] {
        &self.events
    }
}

/// Fans committed events out to every subscriber. Subscriber queues are
/// unbounded: a slow consumer delays delivery but never loses an event.
pub struct HookBroadcaster {
    subscribers: DashMap<String, mpsc::UnboundedSender<HookEvent>>,
}

impl HookBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    /// Subscribe and return (subscriber_id, receiver)
    pub fn subscribe(&self) -> (String, mpsc::UnboundedReceiver<HookEvent>) {
        let subscriber_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(subscriber_id.clone(), tx);
        log::debug!("[hooks] Subscriber {} registered", subscriber_id);
        (subscriber_id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
        log::debug!("[hooks] Subscriber {} removed", subscriber_id);
    }

    /// Publish a committed batch
    pub fn publish(&self, pending: PendingHooks) {
        for event in pending.events {
            self.broadcast(event);
        }
    }

    fn broadcast(&self, event: HookEvent) {
        let mut failed = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                failed.push(entry.key().clone());
            }
        }

        for subscriber_id in failed {
            self.subscribers.remove(&subscriber_id);
            log::debug!("[hooks] Removed closed subscriber {}", subscriber_id);
        }

        log::debug!(
            "[hooks] '{}' for {} sent to {} subscribers",
            event.event,
            event.master_agent_id,
            self.subscribers.len()
        );
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for HookBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// POSTs every event as JSON to the configured callback URL
pub struct CallbackForwarder {
    client: reqwest::Client,
    url: String,
}

impl CallbackForwarder {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.to_string(),
        }
    }

    pub async fn run(self, broadcaster: Arc<HookBroadcaster>, shutdown: CancellationToken) {
        let (subscriber_id, mut rx) = broadcaster.subscribe();
        log::info!("[hooks] Forwarding events to {}", self.url);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.forward(&event).await;
                }
            }
        }

        broadcaster.unsubscribe(&subscriber_id);
        log::info!("[hooks] Forwarder stopped");
    }

    async fn forward(&self, event: &HookEvent) {
        match self.client.post(&self.url).json(event).send().await {
            Ok(resp) if resp.status().is_success() => {
                log::debug!("[hooks] Delivered '{}' ({})", event.event, event.id);
            }
            Ok(resp) => {
                log::warn!("[hooks] Callback returned {} for '{}' ({})", resp.status(), event.event, event.id);
            }
            Err(e) => {
                log::warn!("[hooks] Callback failed for '{}' ({}): {}", event.event, event.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reputation_types::hook_events;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let broadcaster = HookBroadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe();

        let mut pending = PendingHooks::new();
        pending.push(hook_events::AGENT_REGISTERED, "0xm1", json!({ "chain_id": "8453" }));
        pending.push(hook_events::LINK_CREATED, "0xm1", json!({}));
        assert_eq!(pending.len(), 2);
        broadcaster.publish(pending);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, "agent.registered");
        assert_eq!(first.payload["chain_id"], "8453");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, "link.created");
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_burst_beyond_old_capacity_is_not_dropped() {
        let broadcaster = HookBroadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe();

        for i in 0..1100 {
            let mut pending = PendingHooks::new();
            pending.push(hook_events::REPUTATION_CHANGED, &format!("0xm{}", i), json!({}));
            broadcaster.publish(pending);
        }

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event.master_agent_id);
        }
        assert_eq!(received.len(), 1100);
        assert_eq!(received[0], "0xm0");
        assert_eq!(received[1099], "0xm1099");
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_dropped() {
        let broadcaster = HookBroadcaster::new();
        let (_id, rx) = broadcaster.subscribe();
        drop(rx);

        let mut pending = PendingHooks::new();
        pending.push(hook_events::LINK_REMOVED, "0xm1", json!({}));
        broadcaster.publish(pending);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
