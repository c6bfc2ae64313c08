//! Per-topic subscription map: refcounted dispatchers plus a debounced
//! adapter unsubscribe so a quick unsubscribe/resubscribe pair never
//! round-trips to the cluster adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::framing::NodeId;

/// Receives locally-dispatched messages for topics it is subscribed to.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, topic: &str, from: NodeId, payload: Bytes);
}

struct Entry {
    dispatcher: Arc<dyn Dispatcher>,
    refcount: usize,
}

#[derive(Default)]
struct TopicState {
    entries: Vec<Entry>,
    pending_unsubscribe: Option<CancellationToken>,
}

/// Tracks, per topic, which dispatchers are interested and how many times
/// each has subscribed. Adapter subscribe/unsubscribe calls are driven from
/// topic-level transitions (empty -> nonempty, nonempty -> empty), not from
/// individual dispatcher refcount changes.
pub struct SubscriptionMap {
    topics: DashMap<String, TopicState>,
    debounce: Duration,
}

/// What changed in the map as a result of a `subscribe`/`unsubscribe` call,
/// telling the caller whether it needs to touch the cluster adapter.
pub enum TopicTransition {
    None,
    BecameActive,
    ScheduledInactive(CancellationToken),
}

impl SubscriptionMap {
    pub fn new(debounce: Duration) -> Self {
        Self { topics: DashMap::new(), debounce }
    }

    pub fn subscribe(&self, topic: &str, dispatcher: Arc<dyn Dispatcher>) -> TopicTransition {
        let mut state = self.topics.entry(topic.to_string()).or_default();
        let was_empty = state.entries.is_empty();

        if let Some(token) = state.pending_unsubscribe.take() {
            token.cancel();
            debug!(topic, "chain-pubsub: cancelled pending unsubscribe, resubscribed within debounce window");
        }

        if let Some(existing) = state.entries.iter_mut().find(|e| Arc::ptr_eq(&e.dispatcher, &dispatcher)) {
            existing.refcount += 1;
        } else {
            state.entries.push(Entry { dispatcher, refcount: 1 });
        }

        if was_empty {
            TopicTransition::BecameActive
        } else {
            TopicTransition::None
        }
    }

    pub fn unsubscribe(&self, topic: &str, dispatcher: &Arc<dyn Dispatcher>) -> TopicTransition {
        let Some(mut state) = self.topics.get_mut(topic) else {
            return TopicTransition::None;
        };

        if let Some(pos) = state.entries.iter().position(|e| Arc::ptr_eq(&e.dispatcher, dispatcher)) {
            state.entries[pos].refcount -= 1;
            if state.entries[pos].refcount == 0 {
                state.entries.remove(pos);
            }
        }

        if state.entries.is_empty() {
            let token = CancellationToken::new();
            state.pending_unsubscribe = Some(token.clone());
            TopicTransition::ScheduledInactive(token)
        } else {
            TopicTransition::None
        }
    }

    /// Remove `topic` entirely if it is still empty and its pending token
    /// was not cancelled. Called after the debounce delay elapses.
    pub fn finalize_inactive(&self, topic: &str, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        let Some(state) = self.topics.get(topic) else {
            return false;
        };
        if !state.entries.is_empty() {
            return false;
        }
        drop(state);
        self.topics.remove(topic);
        true
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn dispatchers_for(&self, topic: &str) -> Vec<Arc<dyn Dispatcher>> {
        self.topics
            .get(topic)
            .map(|state| state.entries.iter().map(|e| e.dispatcher.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_active(&self, topic: &str) -> bool {
        self.topics.get(topic).map(|s| !s.entries.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDispatcher(Arc<AtomicUsize>);

    #[async_trait]
    impl Dispatcher for CountingDispatcher {
        async fn dispatch(&self, _topic: &str, _from: NodeId, _payload: Bytes) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_subscribe_reports_became_active() {
        let map = SubscriptionMap::new(Duration::from_secs(15));
        let d: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher(Arc::new(AtomicUsize::new(0))));
        assert!(matches!(map.subscribe("room:1", d), TopicTransition::BecameActive));
    }

    #[test]
    fn second_subscribe_to_same_dispatcher_increments_refcount_without_transition() {
        let map = SubscriptionMap::new(Duration::from_secs(15));
        let d: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher(Arc::new(AtomicUsize::new(0))));
        map.subscribe("room:1", d.clone());
        assert!(matches!(map.subscribe("room:1", d), TopicTransition::None));
        assert_eq!(map.dispatchers_for("room:1").len(), 1);
    }

    #[test]
    fn unsubscribe_last_dispatcher_schedules_inactive() {
        let map = SubscriptionMap::new(Duration::from_secs(15));
        let d: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher(Arc::new(AtomicUsize::new(0))));
        map.subscribe("room:1", d.clone());
        let transition = map.unsubscribe("room:1", &d);
        assert!(matches!(transition, TopicTransition::ScheduledInactive(_)));
    }

    #[test]
    fn resubscribe_within_debounce_cancels_pending_unsubscribe() {
        let map = SubscriptionMap::new(Duration::from_secs(15));
        let d: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher(Arc::new(AtomicUsize::new(0))));
        map.subscribe("room:1", d.clone());
        let token = match map.unsubscribe("room:1", &d) {
            TopicTransition::ScheduledInactive(t) => t,
            _ => panic!("expected scheduled inactive"),
        };
        map.subscribe("room:1", d);
        assert!(token.is_cancelled());
        assert!(!map.finalize_inactive("room:1", &token));
        assert!(map.is_active("room:1"));
    }

    #[test]
    fn finalize_inactive_removes_empty_topic() {
        let map = SubscriptionMap::new(Duration::from_secs(15));
        let d: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher(Arc::new(AtomicUsize::new(0))));
        map.subscribe("room:1", d.clone());
        let token = match map.unsubscribe("room:1", &d) {
            TopicTransition::ScheduledInactive(t) => t,
            _ => panic!("expected scheduled inactive"),
        };
        assert!(map.finalize_inactive("room:1", &token));
        assert!(!map.is_active("room:1"));
    }
}
