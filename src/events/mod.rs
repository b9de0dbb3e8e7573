//! Process-internal publish/subscribe for pipeline lifecycle events.
//!
//! Fan-out delivery with no backpressure on publishers: each subscriber runs
//! as its own task, so a slow or blocked subscriber never stalls the capture
//! path. No ordering guarantee across subscribers. Owned by the session
//! orchestrator (the composition root), never a process-wide singleton.

pub mod health;

use std::sync::{Arc, Mutex};

use crate::domain::LayerEvent;

type Subscriber = Arc<dyn Fn(LayerEvent) + Send + Sync>;

/// Append-only subscriber list with fire-and-forget dispatch
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers cannot be removed; they live as
    /// long as the bus.
    pub fn subscribe(&self, subscriber: impl Fn(LayerEvent) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(subscriber));
    }

    /// Deliver an event to every subscriber, each on an independent task.
    /// Outside a tokio runtime (unit tests, CLI paths) delivery is inline.
    pub fn publish(&self, event: LayerEvent) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                for subscriber in subscribers {
                    let event = event.clone();
                    handle.spawn(async move { subscriber(event) });
                }
            }
            Err(_) => {
                for subscriber in subscribers {
                    subscriber(event.clone());
                }
            }
        }
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LayerEventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            bus.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish(LayerEvent::new(
            LayerEventKind::UserInput,
            "conversation_capture",
            "tab-1",
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(LayerEvent::new(
            LayerEventKind::LlmStart,
            "conversation_log",
            "tab-1",
        ));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
