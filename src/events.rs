//! Event notifier.
//!
//! Decouples "a balance-affecting event happened" from "who cares".
//! In-process listeners are registered by event name on an `EventBus` owned
//! by the composition root; every emit is also relayed best-effort onto a
//! broadcast channel that feeds the `/ws` push endpoint. A failing listener
//! is logged and never stops the others or the emitter.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const BALANCE_UPDATED: &str = "balance.updated";
pub const RECONCILIATION_COMPLETED: &str = "reconciliation.completed";

pub type EventPayload = serde_json::Value;

type Listener = Arc<dyn Fn(&EventPayload) -> anyhow::Result<()> + Send + Sync>;

/// Event frame pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: String,
    pub payload: EventPayload,
}

pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
    realtime: broadcast::Sender<RealtimeEvent>,
}

impl EventBus {
    pub fn new(realtime_capacity: usize) -> Self {
        let (realtime, _) = broadcast::channel(realtime_capacity);
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            realtime,
        }
    }

    /// Registers a listener; returns a handle usable with [`off`](Self::off).
    pub fn on<F>(&self, event: &str, listener: F) -> u64
    where
        F: Fn(&EventPayload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener by handle. Returns false if it was already gone.
    pub fn off(&self, event: &str, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Synchronously invokes all listeners for `event`, each inside its own
    /// failure boundary, then relays the event to the realtime channel.
    pub fn emit(&self, event: &str, payload: EventPayload) {
        // Snapshot under the read lock so a listener may re-register without
        // deadlocking.
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .get(event)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if let Err(e) = listener(&payload) {
                warn!("Listener for '{}' failed: {}", event, e);
            }
        }

        if self
            .realtime
            .send(RealtimeEvent {
                event: event.to_string(),
                payload,
            })
            .is_err()
        {
            debug!("No realtime subscribers for '{}'", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.realtime.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on(BALANCE_UPDATED, |_| Err(anyhow::anyhow!("boom")));
        let hits_clone = hits.clone();
        bus.on(BALANCE_UPDATED, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(BALANCE_UPDATED, serde_json::json!({"accountId": "a1"}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_off_removes_listener() {
        let bus = EventBus::new(16);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let id = bus.on(BALANCE_UPDATED, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(bus.off(BALANCE_UPDATED, id));
        assert!(!bus.off(BALANCE_UPDATED, id));

        bus.emit(BALANCE_UPDATED, serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_emit_relays_to_realtime_channel() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(
            RECONCILIATION_COMPLETED,
            serde_json::json!({"processed": 3}),
        );

        let event = rx.try_recv().expect("realtime event should be queued");
        assert_eq!(event.event, RECONCILIATION_COMPLETED);
        assert_eq!(event.payload["processed"], 3);
    }
}
