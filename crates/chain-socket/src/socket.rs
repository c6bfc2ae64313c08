//! Socket (one joined channel topic) and Session (one transport
//! connection, possibly multiplexing several joined topics), plus the
//! protocol-level `Handler.Dispatch` that routes `stx_join`/`stx_leave`/
//! `heartbeat`/app events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chain_core::Status;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::{Channel, LeaveReason, TopicHandlers};
use crate::error::{SocketError, SocketResult};

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketStatus {
    /// Join handler is running; not yet eligible to receive pushes.
    Joining,
    Joined,
    /// `handle_leave` is running for this socket.
    Leaving,
    /// Fully torn down: unsubscribed from pub/sub and dropped from the
    /// channel's joined map.
    Removed,
}

/// One joined channel topic within a session. A session rejoining the same
/// topic gets a fresh `Socket` with a new id; the old one is torn down.
pub struct Socket {
    id: String,
    topic: String,
    join_ref: i64,
    status: RwLock<SocketStatus>,
    channel: Arc<Channel>,
    session: Arc<Session>,
}

impl Socket {
    fn new(topic: String, join_ref: i64, channel: Arc<Channel>, session: Arc<Session>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            topic,
            join_ref,
            status: RwLock::new(SocketStatus::Joining),
            channel,
            session,
        })
    }

    pub fn status(&self) -> SocketStatus {
        *self.status.read()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn join_ref(&self) -> i64 {
        self.join_ref
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    fn mark_joined(&self) {
        *self.status.write() = SocketStatus::Joined;
    }

    pub(crate) fn mark_leaving(&self) {
        *self.status.write() = SocketStatus::Leaving;
    }

    pub(crate) fn mark_removed(&self) {
        *self.status.write() = SocketStatus::Removed;
    }

    fn require_joined(&self) -> SocketResult<()> {
        if *self.status.read() == SocketStatus::Joined {
            Ok(())
        } else {
            Err(SocketError::SocketNotJoined)
        }
    }

    pub fn push(&self, event: &str, payload: Option<Value>) -> SocketResult<()> {
        self.require_joined()?;
        let wire = chain_core::Message::Push {
            join_ref: self.join_ref,
            r#ref: 0,
            topic: self.topic.clone(),
            event: event.to_string(),
            payload,
        }
        .encode();
        self.session.push_raw(wire.into_bytes());
        Ok(())
    }

    pub fn send(&self, bytes: &[u8]) -> SocketResult<()> {
        self.require_joined()?;
        self.session.push_raw(bytes.to_vec());
        Ok(())
    }

    pub async fn broadcast(&self, event: &str, payload: Option<Value>) -> SocketResult<()> {
        self.channel.broadcast(&self.topic, event, payload).await
    }
}

/// One transport connection. Outbound bytes queue onto a bounded channel
/// (capacity 32 by default); `Push` drops silently when it is full.
pub struct Session {
    id: String,
    outbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Bytes>>>,
    closed: AtomicBool,
    sockets: RwLock<HashMap<String, Arc<Socket>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    handler: Arc<SocketHandler>,
}

impl Session {
    pub fn new(id: String, capacity: usize, handler: Arc<SocketHandler>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            id,
            outbound_tx: tx,
            outbound_rx: tokio::sync::Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            sockets: RwLock::new(HashMap::new()),
            shutdown: Mutex::new(None),
            handler,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Non-blocking send; drops if the outbound queue is full or the
    /// session is already closed.
    pub fn push_raw(&self, bytes: impl Into<Bytes>) {
        if self.is_closed() {
            return;
        }
        let _ = self.outbound_tx.try_send(bytes.into());
    }

    /// Hand the outbound receiver to a GET stream loop. Only one loop may
    /// hold it at a time; a resumed connection calls this again after the
    /// previous loop calls [`Self::return_receiver`].
    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.outbound_rx.lock().await.take()
    }

    pub async fn return_receiver(&self, rx: mpsc::Receiver<Bytes>) {
        *self.outbound_rx.lock().await = Some(rx);
    }

    /// Forward to the protocol handler to decode and route, unless closed.
    pub async fn dispatch(self: &Arc<Self>, bytes: Bytes) -> SocketResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let handler = self.handler.clone();
        handler.dispatch(self, bytes).await
    }

    fn take_socket(&self, topic: &str) -> Option<Arc<Socket>> {
        self.sockets.write().remove(topic)
    }

    fn set_socket(&self, topic: String, socket: Arc<Socket>) {
        self.sockets.write().insert(topic, socket);
    }

    fn socket_for(&self, topic: &str) -> Option<Arc<Socket>> {
        self.sockets.read().get(topic).cloned()
    }

    /// Arm a single-shot timer; on fire, mark the session closed, drain
    /// its joined sockets, and run `Leave(reason=Close)` on each via the
    /// protocol handler.
    pub fn schedule_shutdown(self: &Arc<Self>, delay: Duration) {
        let token = CancellationToken::new();
        *self.shutdown.lock() = Some(token.clone());
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    this.closed.store(true, Ordering::SeqCst);
                    let sockets: Vec<Arc<Socket>> = this.sockets.write().drain().map(|(_, s)| s).collect();
                    this.handler.handle_close(sockets).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Cancel the pending shutdown timer, if any. Safe to call repeatedly.
    pub fn stop_scheduled_shutdown(&self) {
        if let Some(token) = self.shutdown.lock().take() {
            token.cancel();
        }
    }
}

/// Routes decoded client messages by event: `stx_join`/`stx_leave`/
/// `heartbeat` are handled here, anything else is routed to the matched
/// channel's `HandleIn`.
pub struct SocketHandler {
    channels: RwLock<TopicHandlers<Arc<Channel>>>,
}

impl SocketHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { channels: RwLock::new(TopicHandlers::new()) })
    }

    pub fn register_channel(&self, topic_pattern: &str, channel: Arc<Channel>) -> SocketResult<()> {
        self.channels.write().insert(topic_pattern, channel)
    }

    pub async fn dispatch(&self, session: &Arc<Session>, bytes: Bytes) -> SocketResult<()> {
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| SocketError::Wire(chain_core::ChainError::DecodeError(e.to_string())))?;
        let msg = chain_core::Message::decode(text)?;
        let chain_core::Message::Push { join_ref, r#ref, topic, event, payload } = msg else {
            return Ok(());
        };

        match event.as_str() {
            "stx_join" => self.handle_join_event(session, join_ref, r#ref, topic, payload).await,
            "stx_leave" => {
                self.handle_leave_event(session, r#ref, &topic).await;
                Ok(())
            }
            "heartbeat" => Ok(()),
            _ => self.handle_in_event(session, r#ref, &topic, &event, payload).await,
        }
    }

    async fn handle_join_event(
        &self,
        session: &Arc<Session>,
        join_ref: i64,
        r#ref: i64,
        topic: String,
        payload: Option<Value>,
    ) -> SocketResult<()> {
        let Some((channel, _)) = self.channels.read().match_topic(&topic) else {
            self.reply(session, join_ref, r#ref, Status::Error, Some(json!({"reason": "unmatched_topic"})));
            return Ok(());
        };

        // A previous socket on the same topic must fully leave (with its
        // stale joinRef announced) strictly before the new join reply.
        if let Some(previous) = session.take_socket(&topic) {
            if previous.join_ref() != join_ref {
                let close = chain_core::Message::Push {
                    join_ref: previous.join_ref(),
                    r#ref: 0,
                    topic: topic.clone(),
                    event: "stx_close".to_string(),
                    payload: None,
                }
                .encode();
                session.push_raw(close.into_bytes());
            }
            previous.channel().handle_leave(&topic, &previous, LeaveReason::Rejoin).await;
        }

        let socket = Socket::new(topic.clone(), join_ref, channel.clone(), session.clone());
        match channel.handle_join(&topic, &socket, payload).await {
            Ok(reply) => {
                socket.mark_joined();
                session.set_socket(topic, socket);
                self.reply(session, join_ref, r#ref, Status::Ok, reply);
            }
            Err(e) => {
                self.reply(session, join_ref, r#ref, Status::Error, Some(json!({"reason": e.to_string()})));
            }
        }
        Ok(())
    }

    async fn handle_leave_event(&self, session: &Arc<Session>, r#ref: i64, topic: &str) {
        if let Some(socket) = session.take_socket(topic) {
            let join_ref = socket.join_ref();
            socket.channel().handle_leave(topic, &socket, LeaveReason::Leave).await;
            self.reply(session, join_ref, r#ref, Status::Ok, None);
        }
    }

    async fn handle_in_event(
        &self,
        session: &Arc<Session>,
        r#ref: i64,
        topic: &str,
        event: &str,
        payload: Option<Value>,
    ) -> SocketResult<()> {
        let Some(socket) = session.socket_for(topic) else {
            return Err(SocketError::SocketNotJoined);
        };
        match socket.channel().handle_in(event, payload, &socket).await {
            Ok(Some(reply)) => {
                self.reply(session, socket.join_ref(), r#ref, Status::Ok, Some(reply));
            }
            Ok(None) => {}
            Err(e) => {
                self.reply(session, socket.join_ref(), r#ref, Status::Error, Some(json!({"reason": e.to_string()})));
            }
        }
        Ok(())
    }

    fn reply(&self, session: &Arc<Session>, join_ref: i64, r#ref: i64, status: Status, payload: Option<Value>) {
        let wire = chain_core::Message::Reply { join_ref, r#ref, status, payload }.encode();
        session.push_raw(wire.into_bytes());
    }

    pub async fn handle_close(&self, sockets: Vec<Arc<Socket>>) {
        for socket in sockets {
            let topic = socket.topic().to_string();
            socket.channel().handle_leave(&topic, &socket, LeaveReason::Close).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::JoinHandler;
    use async_trait::async_trait;
    use chain_pubsub::PubSub;

    struct EchoJoin;

    #[async_trait]
    impl JoinHandler for EchoJoin {
        async fn call(
            &self,
            _topic: &str,
            _params: &[String],
            _socket: &Arc<Socket>,
            payload: Option<Value>,
        ) -> SocketResult<Option<Value>> {
            Ok(payload)
        }
    }

    fn pubsub() -> Arc<PubSub> {
        PubSub::new([0u8; 20], Duration::from_secs(1), None, false)
    }

    #[tokio::test]
    async fn join_then_heartbeat_then_leave_round_trips() {
        let channel = Channel::new(pubsub());
        channel.join("room:*", Arc::new(EchoJoin)).unwrap();

        let handler = SocketHandler::new();
        handler.register_channel("room:*", channel).unwrap();

        let session = Session::new("s1".to_string(), DEFAULT_OUTBOUND_CAPACITY, handler.clone());
        let mut rx = session.take_receiver().await.unwrap();

        let join_msg = chain_core::Message::Push {
            join_ref: 1,
            r#ref: 1,
            topic: "room:1".to_string(),
            event: "stx_join".to_string(),
            payload: Some(json!({"ok": true})),
        }
        .encode();
        session.dispatch(Bytes::from(join_msg.into_bytes())).await.unwrap();

        let reply_bytes = rx.recv().await.unwrap();
        let reply = chain_core::Message::decode(std::str::from_utf8(&reply_bytes).unwrap()).unwrap();
        assert!(matches!(reply, chain_core::Message::Reply { status: Status::Ok, .. }));

        let heartbeat = chain_core::Message::Push {
            join_ref: 1,
            r#ref: 2,
            topic: "room:1".to_string(),
            event: "heartbeat".to_string(),
            payload: None,
        }
        .encode();
        session.dispatch(Bytes::from(heartbeat.into_bytes())).await.unwrap();

        let leave = chain_core::Message::Push {
            join_ref: 1,
            r#ref: 3,
            topic: "room:1".to_string(),
            event: "stx_leave".to_string(),
            payload: None,
        }
        .encode();
        session.dispatch(Bytes::from(leave.into_bytes())).await.unwrap();
        let leave_reply = rx.recv().await.unwrap();
        let decoded = chain_core::Message::decode(std::str::from_utf8(&leave_reply).unwrap()).unwrap();
        assert!(matches!(decoded, chain_core::Message::Reply { status: Status::Ok, .. }));
    }

    #[tokio::test]
    async fn join_to_unmatched_topic_replies_error() {
        let handler = SocketHandler::new();
        let session = Session::new("s2".to_string(), DEFAULT_OUTBOUND_CAPACITY, handler);
        let mut rx = session.take_receiver().await.unwrap();

        let join_msg = chain_core::Message::Push {
            join_ref: 1,
            r#ref: 1,
            topic: "unknown:1".to_string(),
            event: "stx_join".to_string(),
            payload: None,
        }
        .encode();
        session.dispatch(Bytes::from(join_msg.into_bytes())).await.unwrap();
        let reply_bytes = rx.recv().await.unwrap();
        let reply = chain_core::Message::decode(std::str::from_utf8(&reply_bytes).unwrap()).unwrap();
        assert!(matches!(reply, chain_core::Message::Reply { status: Status::Error, .. }));
    }

    #[test]
    fn push_before_join_is_rejected() {
        let channel = Channel::new(pubsub());
        let handler = SocketHandler::new();
        let session = Session::new("s3".to_string(), DEFAULT_OUTBOUND_CAPACITY, handler);
        let socket = Socket::new("room:1".to_string(), 1, channel, session);
        assert!(matches!(socket.push("evt", None), Err(SocketError::SocketNotJoined)));
    }
}
