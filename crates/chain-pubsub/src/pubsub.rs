//! Pub/sub core: ties the adapter registry, the subscription map, and the
//! frame codec together into subscribe/unsubscribe/broadcast/dispatch.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chain_core::contracts::Keyring;
use tracing::warn;

use crate::adapter::AdapterRegistry;
use crate::error::{PubSubError, PubSubResult};
use crate::framing::{self, BroadcastOptions, DecodedFrame, NodeId};
use crate::subscription::{Dispatcher, SubscriptionMap, TopicTransition};

pub fn direct_topic(node_id: NodeId) -> String {
    let mut hex = String::with_capacity(2 * node_id.len());
    for byte in node_id {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("direct:{hex}")
}

pub struct PubSub {
    self_id: NodeId,
    subscriptions: SubscriptionMap,
    adapters: AdapterRegistry,
    keyring: Option<Arc<dyn Keyring>>,
    encryption_required: bool,
}

impl PubSub {
    pub fn new(
        self_id: NodeId,
        debounce: Duration,
        keyring: Option<Arc<dyn Keyring>>,
        encryption_required: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_id,
            subscriptions: SubscriptionMap::new(debounce),
            adapters: AdapterRegistry::new(),
            keyring,
            encryption_required,
        })
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Replace the adapter mapping. Startup-only: adapters already
    /// resolved for in-flight subscriptions are not migrated.
    pub async fn set_adapters(&self, patterns: Vec<(String, crate::adapter::AdapterConfig)>) -> PubSubResult<()> {
        let direct = direct_topic(self.self_id);
        let previous = self.adapters.resolve(&direct).ok();
        if let Some(prev) = &previous {
            if !prev.is_dummy() {
                prev.adapter.unsubscribe(&direct).await;
            }
        }

        self.adapters.set_adapters(patterns)?;

        let current = self.adapters.resolve(&direct)?;
        if !current.is_dummy() {
            current.adapter.subscribe(&direct).await;
        }
        Ok(())
    }

    /// Never blocks on adapter I/O: the adapter subscribe call, if needed,
    /// is dispatched onto a background task.
    pub fn subscribe(&self, topic: &str, dispatcher: Arc<dyn Dispatcher>) -> PubSubResult<()> {
        let transition = self.subscriptions.subscribe(topic, dispatcher);
        if let TopicTransition::BecameActive = transition {
            let config = self.adapters.resolve(topic)?;
            if !config.is_dummy() {
                let topic = topic.to_string();
                tokio::spawn(async move {
                    config.adapter.subscribe(&topic).await;
                });
            }
        }
        Ok(())
    }

    /// Decrement `dispatcher`'s refcount on `topic`; if this drains the
    /// topic, schedule a debounced adapter unsubscribe that a resubscribe
    /// within the window cancels.
    pub fn unsubscribe(self: &Arc<Self>, topic: &str, dispatcher: &Arc<dyn Dispatcher>) {
        let transition = self.subscriptions.unsubscribe(topic, dispatcher);
        let TopicTransition::ScheduledInactive(token) = transition else {
            return;
        };

        let this = Arc::clone(self);
        let topic = topic.to_string();
        let debounce = self.subscriptions.debounce();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    if this.subscriptions.finalize_inactive(&topic, &token) {
                        if let Ok(config) = this.adapters.resolve(&topic) {
                            if !config.is_dummy() {
                                config.adapter.unsubscribe(&topic).await;
                            }
                        }
                    }
                }
                _ = token.cancelled() => {}
            }
        });
    }

    pub async fn broadcast(&self, topic: &str, payload: &[u8], opts: BroadcastOptions) -> PubSubResult<()> {
        let config = self.adapters.resolve(topic)?;
        if config.is_dummy() {
            self.local_dispatch(topic, self.self_id, Bytes::copy_from_slice(payload));
            return Ok(());
        }

        let merged = BroadcastOptions {
            disable_compression: opts.disable_compression || config.disable_compression,
            disable_encryption: opts.disable_encryption || config.disable_encryption,
        };
        let wire = framing::build_broadcast(self.self_id, payload, self.keyring.as_deref(), merged)?;
        config
            .adapter
            .broadcast(topic, &wire)
            .await
            .map_err(|e| PubSubError::AdapterFailure(e.to_string()))?;
        self.local_dispatch(topic, self.self_id, Bytes::copy_from_slice(payload));
        Ok(())
    }

    pub async fn direct_broadcast(
        &self,
        node_id: NodeId,
        topic: &str,
        payload: &[u8],
        opts: BroadcastOptions,
    ) -> PubSubResult<()> {
        let direct = direct_topic(node_id);
        let config = self.adapters.resolve(&direct)?;
        if config.is_dummy() {
            return Ok(());
        }

        let merged = BroadcastOptions {
            disable_compression: opts.disable_compression || config.disable_compression,
            disable_encryption: opts.disable_encryption || config.disable_encryption,
        };
        let wire = framing::build_direct_broadcast(
            self.self_id,
            node_id,
            topic,
            payload,
            self.keyring.as_deref(),
            merged,
        )?;
        config
            .adapter
            .broadcast(&direct, &wire)
            .await
            .map_err(|e| PubSubError::AdapterFailure(e.to_string()))?;
        Ok(())
    }

    /// Entry point for bytes arriving from a cluster adapter on `topic`:
    /// peel the frame and fan out to local subscribers.
    pub fn handle_inbound(self: &Arc<Self>, topic: &str, bytes: &[u8]) {
        match framing::dispatch_frame(bytes, self.self_id, self.keyring.as_deref(), self.encryption_required) {
            Ok(DecodedFrame::Broadcast { from, payload }) => {
                if from == self.self_id {
                    return;
                }
                self.local_dispatch(topic, from, payload);
            }
            Ok(DecodedFrame::DirectBroadcast { from, topic: inner_topic, payload, .. }) => {
                self.local_dispatch(&inner_topic, from, payload);
            }
            Err(e) => {
                warn!(topic, error = %e, "chain-pubsub: dropping malformed inbound frame");
            }
        }
    }

    /// Fan out `payload` to local subscribers of `topic` without touching
    /// the adapter at all ("local-only" broadcast path).
    pub fn local_broadcast(&self, topic: &str, payload: Bytes) {
        self.local_dispatch(topic, self.self_id, payload);
    }

    fn local_dispatch(&self, topic: &str, from: NodeId, payload: Bytes) {
        for dispatcher in self.subscriptions.dispatchers_for(topic) {
            let topic = topic.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(&topic, from, payload).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterConfig, LocalAdapter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingDispatcher(Arc<AtomicUsize>);

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, _topic: &str, _from: NodeId, _payload: Bytes) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn node(tag: u8) -> NodeId {
        let mut id = [0u8; 20];
        id[0] = tag;
        id
    }

    #[tokio::test]
    async fn broadcast_to_dummy_adapter_dispatches_locally() {
        let pubsub = PubSub::new(node(1), Duration::from_millis(50), None, false);
        pubsub
            .set_adapters(vec![("*".to_string(), AdapterConfig { adapter: Arc::new(LocalAdapter), disable_compression: false, disable_encryption: false })])
            .await
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher(hits.clone()));
        pubsub.subscribe("room:1", dispatcher).unwrap();

        pubsub.broadcast("room:1", b"hi", BroadcastOptions::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_adapter_configured_rejects_broadcast() {
        let pubsub = PubSub::new(node(2), Duration::from_millis(50), None, false);
        let err = pubsub.broadcast("room:1", b"hi", BroadcastOptions::default()).await.unwrap_err();
        assert!(matches!(err, PubSubError::NoAdapter(_)));
    }

    #[tokio::test]
    async fn direct_topic_is_stable_hex_encoding() {
        assert_eq!(direct_topic(node(0xab)), format!("direct:{}", {
            let mut s = "ab".to_string();
            s.push_str(&"00".repeat(19));
            s
        }));
    }

    #[tokio::test]
    async fn resubscribe_within_debounce_keeps_adapter_subscribed() {
        let pubsub = PubSub::new(node(3), Duration::from_millis(100), None, false);
        pubsub
            .set_adapters(vec![("*".to_string(), AdapterConfig { adapter: Arc::new(LocalAdapter), disable_compression: false, disable_encryption: false })])
            .await
            .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher(hits));
        pubsub.subscribe("room:1", dispatcher.clone()).unwrap();
        pubsub.unsubscribe("room:1", &dispatcher);
        pubsub.subscribe("room:1", dispatcher).unwrap();
        assert!(pubsub.subscriptions.is_active("room:1"));
    }
}
