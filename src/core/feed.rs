//! Purpose: Plugin-side building blocks that implement the change stream contract.
//! Exports: `ChangeFeed`, `ElementCell`.
//! Role: Lossless in-process fan-out from one publisher to many subscribers.
//! Invariants: Every subscriber sees every value published after it subscribed, in order.
//! Invariants: Queues are unbounded; a slow subscriber grows memory instead of losing values.
//! Invariants: `ElementCell` replays its current payload to each new subscriber first.
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::error::Error;
use super::plugin::{ChangeStream, Element, Payload};

pub struct ChangeFeed<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Result<T, Error>>>>,
}

impl<T: Clone + Send + 'static> ChangeFeed<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> ChangeStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    /// Deliver `value` to every live subscriber; closed subscribers are dropped.
    pub fn publish(&self, value: T) {
        lock(&self.subscribers).retain(|tx| tx.send(Ok(value.clone())).is_ok());
    }

    /// Deliver an error; each subscriber's stream ends after it and the feed forgets them.
    pub fn fail(&self, err: impl Fn() -> Error) {
        for tx in lock(&self.subscribers).drain(..) {
            let _ = tx.send(Err(err()));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for ChangeFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// An element whose payload lives in memory and whose change stream starts with the
/// current value.
pub struct ElementCell {
    id: String,
    state: Mutex<CellState>,
}

struct CellState {
    payload: Payload,
    subscribers: Vec<mpsc::UnboundedSender<Result<Payload, Error>>>,
}

impl ElementCell {
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(CellState {
                payload,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Merge `fields` into the payload and notify subscribers. `id` and `uri` are immutable.
    pub fn merge(&self, fields: Payload) {
        self.modify(|payload| {
            for (key, value) in fields {
                if key == "id" || key == "uri" {
                    continue;
                }
                payload.insert(key, value);
            }
        });
    }

    pub fn modify(&self, apply: impl FnOnce(&mut Payload)) {
        let mut state = lock(&self.state);
        apply(&mut state.payload);
        let snapshot = state.payload.clone();
        state
            .subscribers
            .retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl Element for ElementCell {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> Payload {
        lock(&self.state).payload.clone()
    }

    fn changes(&self) -> ChangeStream<Payload> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        if tx.send(Ok(state.payload.clone())).is_ok() {
            state.subscribers.push(tx);
        }
        UnboundedReceiverStream::new(rx).boxed()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::{ChangeFeed, ElementCell};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::plugin::Element;
    use futures::StreamExt;
    use serde_json::{Value, json};

    fn object(value: Value) -> super::Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn feed_delivers_in_order_to_every_subscriber() {
        let feed = ChangeFeed::new();
        let mut first = feed.subscribe();
        let mut second = feed.subscribe();
        for value in 0..5 {
            feed.publish(value);
        }
        for stream in [&mut first, &mut second] {
            for expected in 0..5 {
                let got = stream.next().await.expect("value").expect("ok");
                assert_eq!(got, expected);
            }
        }
    }

    #[tokio::test]
    async fn feed_forgets_dropped_subscribers() {
        let feed = ChangeFeed::<u32>::new();
        let kept = feed.subscribe();
        drop(feed.subscribe());
        feed.publish(1);
        assert_eq!(feed.subscriber_count(), 1);
        drop(kept);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn feed_failure_ends_streams() {
        let feed = ChangeFeed::<u32>::new();
        let mut stream = feed.subscribe();
        feed.fail(|| Error::new(ErrorKind::Internal).with_message("sensor offline"));
        let item = stream.next().await.expect("item");
        assert!(item.is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cell_replays_current_value_then_changes() {
        let cell = ElementCell::new("a", object(json!({"id": "a", "name": "desk", "uri": "/x/y/a"})));
        let mut changes = cell.changes();
        cell.merge(object(json!({"brightness": 10, "id": "hijack"})));

        let first = changes.next().await.expect("current").expect("ok");
        assert_eq!(first.get("brightness"), None);
        let second = changes.next().await.expect("change").expect("ok");
        assert_eq!(second.get("brightness"), Some(&json!(10)));
        assert_eq!(second.get("id"), Some(&json!("a")));
        assert_eq!(cell.snapshot().get("brightness"), Some(&json!(10)));
    }
}
