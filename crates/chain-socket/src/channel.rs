//! Channel: topic-scoped join/in/out/leave handler registries, wired into
//! the pub/sub fabric as a dispatcher on `"ch:" + topic`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chain_pubsub::{BroadcastOptions, Dispatcher, NodeId, PubSub};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::error::{SocketError, SocketResult};
use crate::socket::Socket;

/// Why a socket left its channel; drives which cleanup callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Leave,
    Rejoin,
    Close,
}

#[async_trait]
pub trait JoinHandler: Send + Sync {
    async fn call(
        &self,
        topic: &str,
        params: &[String],
        socket: &Arc<Socket>,
        payload: Option<Value>,
    ) -> SocketResult<Option<Value>>;
}

#[async_trait]
pub trait InHandler: Send + Sync {
    async fn call(&self, event: &str, payload: Option<Value>, socket: &Arc<Socket>) -> SocketResult<Option<Value>>;
}

#[async_trait]
pub trait OutHandler: Send + Sync {
    async fn call(&self, event: &str, payload: Option<Value>, socket: &Arc<Socket>);
}

#[async_trait]
pub trait LeaveHandler: Send + Sync {
    async fn call(&self, socket: &Arc<Socket>, reason: LeaveReason);
}

/// A minimal exact-or-trailing-wildcard table that, unlike
/// [`chain_core::WildcardStore`], also hands back the matched remainder
/// split on `:` as positional params. Channel topics (`"room:42"`) and
/// event names don't need full path-template parsing, just this.
pub(crate) struct TopicHandlers<T: Clone> {
    exact: Vec<(String, T)>,
    wildcards: Vec<(String, T)>,
}

impl<T: Clone> TopicHandlers<T> {
    pub(crate) fn new() -> Self {
        Self { exact: Vec::new(), wildcards: Vec::new() }
    }

    pub(crate) fn insert(&mut self, pattern: &str, value: T) -> SocketResult<()> {
        if let Some(prefix) = pattern.strip_suffix('*') {
            if self.wildcards.iter().any(|(p, _)| p == prefix) {
                return Err(SocketError::Wire(chain_core::ChainError::DuplicateKey(pattern.to_string())));
            }
            self.wildcards.push((prefix.to_string(), value));
            self.wildcards.sort_by_key(|(p, _)| p.len());
        } else {
            if self.exact.iter().any(|(k, _)| k == pattern) {
                return Err(SocketError::Wire(chain_core::ChainError::DuplicateKey(pattern.to_string())));
            }
            self.exact.push((pattern.to_string(), value));
        }
        Ok(())
    }

    /// Exact match wins; otherwise the first (most general, shortest-prefix)
    /// wildcard entry, scanning the ascending-sorted list front to back.
    pub(crate) fn match_topic(&self, topic: &str) -> Option<(T, Vec<String>)> {
        if let Some((_, v)) = self.exact.iter().find(|(k, _)| k == topic) {
            return Some((v.clone(), Vec::new()));
        }
        self.wildcards.iter().find(|(p, _)| topic.starts_with(p.as_str())).map(|(p, v)| {
            let remainder = &topic[p.len()..];
            let params = remainder.split(':').filter(|s| !s.is_empty()).map(String::from).collect();
            (v.clone(), params)
        })
    }
}

pub struct Channel {
    join: RwLock<TopicHandlers<Arc<dyn JoinHandler>>>,
    handle_in: RwLock<TopicHandlers<Arc<dyn InHandler>>>,
    handle_out: RwLock<TopicHandlers<Arc<dyn OutHandler>>>,
    leave: RwLock<TopicHandlers<Arc<dyn LeaveHandler>>>,
    pubsub: Arc<PubSub>,
    joined: RwLock<HashMap<String, HashMap<String, Arc<Socket>>>>,
}

impl Channel {
    pub fn new(pubsub: Arc<PubSub>) -> Arc<Self> {
        Arc::new(Self {
            join: RwLock::new(TopicHandlers::new()),
            handle_in: RwLock::new(TopicHandlers::new()),
            handle_out: RwLock::new(TopicHandlers::new()),
            leave: RwLock::new(TopicHandlers::new()),
            pubsub,
            joined: RwLock::new(HashMap::new()),
        })
    }

    pub fn join(&self, topic_pattern: &str, handler: Arc<dyn JoinHandler>) -> SocketResult<()> {
        self.join.write().insert(topic_pattern, handler)
    }

    pub fn handle_in_for(&self, event_pattern: &str, handler: Arc<dyn InHandler>) -> SocketResult<()> {
        self.handle_in.write().insert(event_pattern, handler)
    }

    pub fn handle_out_for(&self, event_pattern: &str, handler: Arc<dyn OutHandler>) -> SocketResult<()> {
        self.handle_out.write().insert(event_pattern, handler)
    }

    pub fn leave(&self, topic_pattern: &str, handler: Arc<dyn LeaveHandler>) -> SocketResult<()> {
        self.leave.write().insert(topic_pattern, handler)
    }

    /// Matches a Join handler for `topic`, invokes it with panic recovery,
    /// subscribes this channel as a pub/sub dispatcher on `"ch:"+topic`,
    /// and records `socket` under that topic.
    pub async fn handle_join(
        self: &Arc<Self>,
        topic: &str,
        socket: &Arc<Socket>,
        payload: Option<Value>,
    ) -> SocketResult<Option<Value>> {
        let Some((handler, params)) = self.join.read().match_topic(topic) else {
            return Err(SocketError::UnmatchedTopic(topic.to_string()));
        };

        let socket_for_call = socket.clone();
        let topic_owned = topic.to_string();
        let reply = AssertUnwindSafe(handler.call(&topic_owned, &params, &socket_for_call, payload))
            .catch_unwind()
            .await
            .map_err(|_| SocketError::JoinCrashed(format!("join handler panicked for topic '{topic_owned}'")))??;

        let dispatcher: Arc<dyn Dispatcher> = self.clone();
        self.pubsub
            .subscribe(&format!("ch:{topic}"), dispatcher)
            .map_err(|e| SocketError::PubSub(e.to_string()))?;

        self.joined
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(socket.id().to_string(), socket.clone());

        Ok(reply)
    }

    pub async fn handle_in(&self, event: &str, payload: Option<Value>, socket: &Arc<Socket>) -> SocketResult<Option<Value>> {
        let Some((handler, _)) = self.handle_in.read().match_topic(event) else {
            return Ok(None);
        };
        handler.call(event, payload, socket).await
    }

    /// Unsubscribes from `"ch:"+topic`, removes `socket` from the joined
    /// map, and invokes a matching Leave handler if one is registered.
    /// Moves the socket through `Leaving` before `Removed` so observers
    /// reading its status mid-teardown see it isn't still joined.
    pub async fn handle_leave(self: &Arc<Self>, topic: &str, socket: &Arc<Socket>, reason: LeaveReason) {
        socket.mark_leaving();

        if let Some(sockets) = self.joined.write().get_mut(topic) {
            sockets.remove(socket.id());
        }

        let dispatcher: Arc<dyn Dispatcher> = self.clone();
        self.pubsub.unsubscribe(&format!("ch:{topic}"), &dispatcher);

        if let Some((handler, _)) = self.leave.read().match_topic(topic) {
            handler.call(socket, reason).await;
        }

        socket.mark_removed();
    }

    pub async fn broadcast(&self, topic: &str, event: &str, payload: Option<Value>) -> SocketResult<()> {
        let wire = chain_core::Message::Broadcast { topic: topic.to_string(), event: event.to_string(), payload }.encode();
        self.pubsub
            .broadcast(&format!("ch:{topic}"), wire.as_bytes(), BroadcastOptions::default())
            .await
            .map_err(|e| SocketError::PubSub(e.to_string()))
    }

    pub fn local_broadcast(&self, topic: &str, event: &str, payload: Option<Value>) {
        let wire = chain_core::Message::Broadcast { topic: topic.to_string(), event: event.to_string(), payload }.encode();
        self.pubsub.local_broadcast(&format!("ch:{topic}"), Bytes::from(wire.into_bytes()));
    }
}

#[async_trait]
impl Dispatcher for Channel {
    async fn dispatch(&self, _topic: &str, _from: NodeId, payload: Bytes) {
        let Ok(text) = std::str::from_utf8(&payload) else {
            warn!("chain-socket: dropping non-utf8 channel broadcast");
            return;
        };
        let Ok(chain_core::Message::Broadcast { topic, event, payload }) = chain_core::Message::decode(text) else {
            warn!("chain-socket: dropping malformed channel broadcast");
            return;
        };

        let sockets: Vec<Arc<Socket>> = match self.joined.read().get(&topic) {
            Some(map) => map.values().cloned().collect(),
            None => return,
        };

        if let Some((handler, _)) = self.handle_out.read().match_topic(&event) {
            for socket in &sockets {
                handler.call(&event, payload.clone(), socket).await;
            }
            return;
        }

        let wire = chain_core::Message::Broadcast { topic, event, payload }.encode();
        for socket in &sockets {
            if let Err(e) = socket.send(wire.as_bytes()) {
                warn!(error = %e, "chain-socket: fastlane send to a stale socket");
            }
        }
    }
}
