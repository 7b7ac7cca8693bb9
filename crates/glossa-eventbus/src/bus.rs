use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::envelope::TranslationEventEnvelope;
use crate::event::TranslationEvent;

pub const DEFAULT_ITEM_BUFFER_CAPACITY: usize = 64;
pub const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEventBusConfig {
    pub item_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

impl Default for TranslationEventBusConfig {
    fn default() -> Self {
        Self {
            item_buffer_capacity: DEFAULT_ITEM_BUFFER_CAPACITY,
            global_buffer_capacity: DEFAULT_GLOBAL_BUFFER_CAPACITY,
        }
    }
}

/// Broadcast fanout for translation events: one global channel plus a lazily
/// created channel per item index. Item-scoped publishes mirror to the global
/// channel; publishing with no subscribers is not an error.
#[derive(Debug)]
pub struct TranslationEventBus {
    next_sequence: AtomicU64,
    boot_instant: Instant,
    config: TranslationEventBusConfig,
    item_senders: RwLock<HashMap<usize, broadcast::Sender<TranslationEventEnvelope>>>,
    global_sender: broadcast::Sender<TranslationEventEnvelope>,
}

impl Default for TranslationEventBus {
    fn default() -> Self {
        Self::new(TranslationEventBusConfig::default())
    }
}

impl TranslationEventBus {
    pub fn new(config: TranslationEventBusConfig) -> Self {
        assert!(
            config.item_buffer_capacity > 0,
            "item_buffer_capacity must be greater than 0"
        );
        assert!(
            config.global_buffer_capacity > 0,
            "global_buffer_capacity must be greater than 0"
        );

        let (global_sender, _global_receiver) = broadcast::channel(config.global_buffer_capacity);
        Self {
            next_sequence: AtomicU64::new(0),
            boot_instant: Instant::now(),
            config,
            item_senders: RwLock::new(HashMap::new()),
            global_sender,
        }
    }

    pub fn subscribe_item(&self, item: usize) -> broadcast::Receiver<TranslationEventEnvelope> {
        if let Some(sender) = self.item_sender(item) {
            return sender.subscribe();
        }

        let mut item_senders = self
            .item_senders
            .write()
            .expect("translation eventbus item sender lock poisoned");
        let sender = item_senders.entry(item).or_insert_with(|| {
            let (sender, _receiver) = broadcast::channel(self.config.item_buffer_capacity);
            sender
        });
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<TranslationEventEnvelope> {
        self.global_sender.subscribe()
    }

    /// Drops an item's channel, closing any of its subscribers. A later
    /// `subscribe_item` recreates the channel.
    pub fn remove_item(&self, item: usize) -> bool {
        let mut item_senders = self
            .item_senders
            .write()
            .expect("translation eventbus item sender lock poisoned");
        item_senders.remove(&item).is_some()
    }

    pub fn publish_item(&self, item: usize, event: TranslationEvent) -> TranslationEventEnvelope {
        let envelope = self.envelope(Some(item), event);

        let item_sender = self.item_sender(item);
        let has_item_receivers = item_sender
            .as_ref()
            .is_some_and(|sender| sender.receiver_count() > 0);
        let has_global_receivers = self.global_sender.receiver_count() > 0;

        match (has_item_receivers, has_global_receivers) {
            (true, true) => {
                let _ = item_sender
                    .as_ref()
                    .expect("item sender should exist when receiver count is non-zero")
                    .send(envelope.clone());
                let _ = self.global_sender.send(envelope.clone());
            }
            (true, false) => {
                let _ = item_sender
                    .as_ref()
                    .expect("item sender should exist when receiver count is non-zero")
                    .send(envelope.clone());
            }
            (false, true) => {
                let _ = self.global_sender.send(envelope.clone());
            }
            (false, false) => {}
        }

        envelope
    }

    /// Publishes a project-scoped event on the global channel only.
    pub fn publish_global(&self, event: TranslationEvent) -> TranslationEventEnvelope {
        let envelope = self.envelope(None, event);
        if self.global_sender.receiver_count() > 0 {
            let _ = self.global_sender.send(envelope.clone());
        }
        envelope
    }

    fn envelope(&self, item: Option<usize>, event: TranslationEvent) -> TranslationEventEnvelope {
        TranslationEventEnvelope {
            item,
            sequence: self.next_sequence(),
            received_at_monotonic_nanos: self.monotonic_nanos_since_bus_bootstrap(),
            event,
        }
    }

    fn item_sender(&self, item: usize) -> Option<broadcast::Sender<TranslationEventEnvelope>> {
        let item_senders = self
            .item_senders
            .read()
            .expect("translation eventbus item sender lock poisoned");
        item_senders.get(&item).cloned()
    }

    fn next_sequence(&self) -> u64 {
        let mut current = self.next_sequence.load(Ordering::Relaxed);
        loop {
            let next = current
                .checked_add(1)
                .expect("translation event sequence exhausted");
            match self.next_sequence.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    fn monotonic_nanos_since_bus_bootstrap(&self) -> u64 {
        let nanos = self.boot_instant.elapsed().as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use glossa_domain::TranslationState;
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use super::{TranslationEventBus, TranslationEventBusConfig};
    use crate::event::{FragmentEvent, StateChangedEvent, TranslationEvent};

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn fragment(text: &str) -> TranslationEvent {
        TranslationEvent::Fragment(FragmentEvent {
            text: text.to_owned(),
        })
    }

    #[test]
    #[should_panic(expected = "translation event sequence exhausted")]
    fn publish_panics_when_sequence_space_is_exhausted() {
        let bus = TranslationEventBus::default();
        bus.next_sequence
            .store(u64::MAX, std::sync::atomic::Ordering::Relaxed);

        let _ = bus.publish_item(0, fragment("x"));
    }

    #[test]
    fn publish_allocates_monotonic_sequence_numbers() {
        let bus = TranslationEventBus::default();

        let first = bus.publish_item(3, fragment("a"));
        let second = bus.publish_global(TranslationEvent::StateChanged(StateChangedEvent {
            state: TranslationState::Idle,
        }));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(second.received_at_monotonic_nanos >= first.received_at_monotonic_nanos);
    }

    #[tokio::test]
    async fn publish_item_fans_out_to_item_and_global_subscribers() {
        let bus = TranslationEventBus::default();
        let mut item_subscriber = bus.subscribe_item(2);
        let mut global_subscriber = bus.subscribe_all();

        let published = bus.publish_item(2, fragment("chunk"));

        let item_envelope = timeout(TEST_TIMEOUT, item_subscriber.recv())
            .await
            .expect("item recv timed out")
            .expect("item recv should succeed");
        let global_envelope = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");

        assert_eq!(item_envelope, published);
        assert_eq!(global_envelope, published);
        assert_eq!(item_envelope.item, Some(2));
    }

    #[tokio::test]
    async fn item_subscriptions_only_receive_matching_item_events() {
        let bus = TranslationEventBus::default();
        let mut subscriber_a = bus.subscribe_item(0);
        let mut subscriber_b = bus.subscribe_item(1);

        let event_a = bus.publish_item(0, fragment("a"));
        let event_b = bus.publish_item(1, fragment("b"));

        let received_a = timeout(TEST_TIMEOUT, subscriber_a.recv())
            .await
            .expect("item 0 recv timed out")
            .expect("item 0 recv should succeed");
        let received_b = timeout(TEST_TIMEOUT, subscriber_b.recv())
            .await
            .expect("item 1 recv timed out")
            .expect("item 1 recv should succeed");

        assert_eq!(received_a, event_a);
        assert_eq!(received_b, event_b);
    }

    #[tokio::test]
    async fn project_scoped_events_skip_item_channels() {
        let bus = TranslationEventBus::default();
        let mut item_subscriber = bus.subscribe_item(0);
        let mut global_subscriber = bus.subscribe_all();

        let published = bus.publish_global(TranslationEvent::StateChanged(StateChangedEvent {
            state: TranslationState::Translating,
        }));

        let global_envelope = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect("global recv should succeed");
        assert_eq!(global_envelope, published);
        assert_eq!(global_envelope.item, None);

        // The item channel saw nothing; publish another item event and make
        // sure it is the first thing the item subscriber receives.
        let item_event = bus.publish_item(0, fragment("next"));
        let received = timeout(TEST_TIMEOUT, item_subscriber.recv())
            .await
            .expect("item recv timed out")
            .expect("item recv should succeed");
        assert_eq!(received, item_event);
    }

    #[tokio::test]
    async fn bounded_queue_reports_lag_for_slow_global_subscriber() {
        let bus = TranslationEventBus::new(TranslationEventBusConfig {
            item_buffer_capacity: 1,
            global_buffer_capacity: 1,
        });
        let mut global_subscriber = bus.subscribe_all();

        for _ in 0..8 {
            let _ = bus.publish_item(0, fragment("x"));
        }

        let lagged = timeout(TEST_TIMEOUT, global_subscriber.recv())
            .await
            .expect("global recv timed out")
            .expect_err("expected lagged receiver due bounded buffer");

        match lagged {
            RecvError::Lagged(skipped) => assert!(skipped >= 1),
            RecvError::Closed => panic!("global channel unexpectedly closed"),
        }
    }

    #[tokio::test]
    async fn remove_item_closes_existing_item_subscribers() {
        let bus = TranslationEventBus::default();
        let mut item_subscriber = bus.subscribe_item(4);

        assert!(bus.remove_item(4));
        assert!(!bus.remove_item(4));

        let closed = timeout(TEST_TIMEOUT, item_subscriber.recv())
            .await
            .expect("item recv timed out")
            .expect_err("item subscription should close after remove_item");
        assert!(matches!(closed, RecvError::Closed));
    }

    #[tokio::test]
    async fn subscribe_item_after_remove_recreates_item_channel() {
        let bus = TranslationEventBus::default();
        let _subscriber = bus.subscribe_item(4);

        assert!(bus.remove_item(4));

        let mut refreshed_subscriber = bus.subscribe_item(4);
        let published = bus.publish_item(4, fragment("again"));
        let received = timeout(TEST_TIMEOUT, refreshed_subscriber.recv())
            .await
            .expect("item recv timed out")
            .expect("item recv should succeed");
        assert_eq!(received, published);
    }
}
