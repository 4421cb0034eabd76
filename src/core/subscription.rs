//! Purpose: Per-connection subscribe/unsubscribe lifecycle and change forwarding.
//! Exports: `SubscriptionEngine`, `Session`, `ConnectionId`.
//! Role: Push-surface core; one `Session` per live connection, one task per subscription.
//! Invariants: Subscriptions are indexed by (connection, topic) and cancelled through that index.
//! Invariants: Dropping a `Session` cancels every forwarding task it owns.
//! Invariants: `subscribeAck` is queued before any data frame of the same subscription.
//! Invariants: No data frame of a topic is queued after that topic's `unsubscribeAck`.
//! Invariants: Outbound queues are unbounded; slow connections are not throttled or dropped.
//! Notes: Duplicate subscriptions on one topic are independent and all end on unsubscribe.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{Error, ErrorKind};
use super::plugin::{Capability, ChangeStream, Resource};
use super::protocol::{ClientMessage, Frame, MessageType, decode_message};
use super::registry::Registry;
use super::topic;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Entry {
    id: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct SubscriptionTable {
    connections: Mutex<HashMap<ConnectionId, HashMap<String, Vec<Entry>>>>,
}

impl SubscriptionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, HashMap<String, Vec<Entry>>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, connection: ConnectionId, topic: &str, entry: Entry) {
        self.lock()
            .entry(connection)
            .or_default()
            .entry(topic.to_string())
            .or_default()
            .push(entry);
    }

    /// Cancel and forget every subscription of `connection` bound to `topic`.
    fn cancel(&self, connection: ConnectionId, topic: &str) -> usize {
        let mut connections = self.lock();
        let Some(topics) = connections.get_mut(&connection) else {
            return 0;
        };
        let entries = topics.remove(topic).unwrap_or_default();
        if topics.is_empty() {
            connections.remove(&connection);
        }
        for entry in &entries {
            entry.token.cancel();
        }
        entries.len()
    }

    /// Forget one subscription whose task already ended.
    fn release(&self, connection: ConnectionId, topic: &str, id: u64) {
        let mut connections = self.lock();
        let Some(topics) = connections.get_mut(&connection) else {
            return;
        };
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
        if topics.is_empty() {
            connections.remove(&connection);
        }
    }

    fn close(&self, connection: ConnectionId) -> usize {
        let topics = self.lock().remove(&connection).unwrap_or_default();
        let mut cancelled = 0;
        for entry in topics.values().flatten() {
            entry.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    fn count(&self, connection: ConnectionId, topic: &str) -> usize {
        self.lock()
            .get(&connection)
            .and_then(|topics| topics.get(topic))
            .map_or(0, Vec::len)
    }

    fn total(&self) -> usize {
        self.lock()
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }
}

/// Frame queue of one connection, shared by its session and forwarding tasks.
///
/// Holding the gate orders a forwarder's cancellation check and send against
/// an unsubscribe's cancel and ack. It is never held across an await.
#[derive(Clone)]
struct Outbound {
    tx: mpsc::UnboundedSender<Frame>,
    gate: Arc<Mutex<()>>,
}

impl Outbound {
    fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            tx,
            gate: Arc::new(Mutex::new(())),
        }
    }

    fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false once the connection's receiver is gone.
    fn send(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Shared state behind every connection's [`Session`].
#[derive(Clone)]
pub struct SubscriptionEngine {
    registry: Arc<Registry>,
    table: Arc<SubscriptionTable>,
    next_connection: Arc<AtomicU64>,
    next_subscription: Arc<AtomicU64>,
}

impl SubscriptionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            table: Arc::new(SubscriptionTable::default()),
            next_connection: Arc::new(AtomicU64::new(1)),
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a session for a new connection. Frames for the client arrive on the receiver.
    pub fn connect(&self) -> (Session, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(connection = %id, "connection opened");
        let session = Session {
            id,
            engine: self.clone(),
            outbound: Outbound::new(tx),
            token: CancellationToken::new(),
        };
        (session, rx)
    }

    /// Number of live subscriptions across all connections.
    pub fn active_subscriptions(&self) -> usize {
        self.table.total()
    }
}

pub struct Session {
    id: ConnectionId,
    engine: SubscriptionEngine,
    outbound: Outbound,
    token: CancellationToken,
}

impl Session {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscriptions of this connection bound to exactly `topic`.
    pub fn subscriptions(&self, topic: &str) -> usize {
        self.engine.table.count(self.id, topic)
    }

    pub fn handle_text(&self, raw: &str) {
        match decode_message(raw) {
            Ok(message) => self.handle(message),
            Err(err) => self.report(&err, None),
        }
    }

    pub fn handle(&self, message: ClientMessage) {
        let ClientMessage { kind, event } = message;
        match (kind, event) {
            (MessageType::Subscribe, Some(topic)) => self.subscribe(&topic),
            (MessageType::Unsubscribe, Some(topic)) => self.unsubscribe(&topic),
            (MessageType::Subscribe | MessageType::Unsubscribe, None) => self.report(
                &Error::new(ErrorKind::Usage).with_message("message has no event"),
                None,
            ),
            (MessageType::Reauthorize, event) => self.report(
                &Error::not_implemented("message type 'reauthorize'"),
                event.as_deref(),
            ),
            (MessageType::Other(kind), event) => self.report(
                &Error::not_implemented(format!("message type '{kind}'")),
                event.as_deref(),
            ),
        }
    }

    pub fn subscribe(&self, topic: &str) {
        if let Err(err) = self.try_subscribe(topic) {
            tracing::debug!(connection = %self.id, topic, error = %err, "subscribe rejected");
            self.report(&err, Some(topic));
        }
    }

    pub fn unsubscribe(&self, topic: &str) {
        let cancelled = {
            let _gate = self.outbound.gate();
            let cancelled = self.engine.table.cancel(self.id, topic);
            self.send(Frame::UnsubscribeAck {
                event: topic.to_string(),
            });
            cancelled
        };
        tracing::debug!(connection = %self.id, topic, cancelled, "unsubscribe");
    }

    fn try_subscribe(&self, topic: &str) -> Result<(), Error> {
        let address = topic::resolve(topic)?;
        let bound = self
            .engine
            .registry
            .resolve(&address.service, &address.resource)?;
        let resource = Arc::clone(bound.resource());
        let capabilities = resource.capabilities();

        match address.element_id.as_deref() {
            Some(id) => {
                if !capabilities.has(Capability::ElementSubscribe) {
                    return Err(Error::not_implemented(format!(
                        "{} on {}",
                        Capability::ElementSubscribe,
                        bound.uri()
                    )));
                }
                let element = resource
                    .element(id)
                    .ok_or_else(|| Error::not_found(format!("element '{id}'")))?;
                let changes = element.changes();
                let forwarder = self.register(topic);
                tracing::debug!(connection = %self.id, topic, "new element level subscription");
                self.send(Frame::SubscribeAck {
                    event: topic.to_string(),
                });
                tokio::spawn(forwarder.run(changes, Value::Object));
            }
            None => {
                if !capabilities.has(Capability::ResourceSubscribe) {
                    return Err(Error::not_implemented(format!(
                        "{} on {}",
                        Capability::ResourceSubscribe,
                        bound.uri()
                    )));
                }
                let changes = resource.changes();
                let forwarder = self.register(topic);
                tracing::debug!(connection = %self.id, topic, "new resource level subscription");
                self.send(Frame::SubscribeAck {
                    event: topic.to_string(),
                });
                tokio::spawn(forwarder.run(changes, move |_change| listing(resource.as_ref())));
            }
        }
        Ok(())
    }

    fn register(&self, topic: &str) -> Forwarder {
        let id = self.engine.next_subscription.fetch_add(1, Ordering::Relaxed);
        let token = self.token.child_token();
        self.engine.table.insert(
            self.id,
            topic,
            Entry {
                id,
                token: token.clone(),
            },
        );
        Forwarder {
            id,
            connection: self.id,
            topic: topic.to_string(),
            outbound: self.outbound.clone(),
            token,
            table: Arc::clone(&self.engine.table),
        }
    }

    /// Send an error frame to this connection.
    pub fn report(&self, err: &Error, topic: Option<&str>) {
        self.send(Frame::error(err, topic));
    }

    fn send(&self, frame: Frame) {
        self.outbound.send(frame);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.token.cancel();
        let cancelled = self.engine.table.close(self.id);
        tracing::debug!(connection = %self.id, cancelled, "connection closed");
    }
}

/// Full listing of `resource`, re-read on every resource change.
fn listing(resource: &dyn Resource) -> Value {
    if !resource.capabilities().has(Capability::List) {
        return Value::Array(Vec::new());
    }
    let elements = resource.list(None, None).unwrap_or_default();
    Value::Array(
        elements
            .iter()
            .map(|element| Value::Object(element.snapshot()))
            .collect(),
    )
}

struct Forwarder {
    id: u64,
    connection: ConnectionId,
    topic: String,
    outbound: Outbound,
    token: CancellationToken,
    table: Arc<SubscriptionTable>,
}

impl Forwarder {
    async fn run<T, F>(self, mut changes: ChangeStream<T>, render: F)
    where
        T: Send + 'static,
        F: Fn(T) -> Value + Send + 'static,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = changes.next() => next,
            };
            match next {
                Some(Ok(change)) => {
                    let data = render(change);
                    let _gate = self.outbound.gate();
                    if self.token.is_cancelled() {
                        break;
                    }
                    if !self.outbound.send(Frame::data(&self.topic, data)) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        connection = %self.connection,
                        topic = %self.topic,
                        error = %err,
                        "change stream failed; subscription ended"
                    );
                    let failure = Error::new(ErrorKind::Failed).with_source(err);
                    let _gate = self.outbound.gate();
                    if !self.token.is_cancelled() {
                        self.outbound.send(Frame::error(&failure, Some(&self.topic)));
                    }
                    break;
                }
                None => break,
            }
        }
        drop(changes);
        self.table.release(self.connection, &self.topic, self.id);
    }
}
