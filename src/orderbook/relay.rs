use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt as _};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event::{OrderEvent, TAG_INSCRIPTION, TAG_OUTPOINT, TAG_TYPE};
use super::ws::WsRelay;
use crate::{OrdError, OrdResult};

/// Capacity of the channels carrying subscription messages.
pub const SUBSCRIPTION_BUFFER: usize = 256;
/// Event ids remembered by a subscription to drop duplicates.
pub const SEEN_EVENTS_CAPACITY: usize = 4096;

/// The last `capacity` event ids, oldest forgotten first.
#[derive(Debug)]
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records `id`, returning whether it was not already known.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }
}

/// NIP-01 subscription filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#i", skip_serializing_if = "Option::is_none")]
    pub inscription_ids: Option<Vec<String>>,
    #[serde(rename = "#u", skip_serializing_if = "Option::is_none")]
    pub outpoints: Option<Vec<String>>,
    #[serde(rename = "#t", skip_serializing_if = "Option::is_none")]
    pub order_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds = Some(vec![kind]);
        self
    }

    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn inscription_id(mut self, id: impl ToString) -> Self {
        self.inscription_ids = Some(vec![id.to_string()]);
        self
    }

    pub fn outpoint(mut self, outpoint: impl ToString) -> Self {
        self.outpoints = Some(vec![outpoint.to_string()]);
        self
    }

    pub fn order_type(mut self, order_type: impl ToString) -> Self {
        self.order_types = Some(vec![order_type.to_string()]);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes the filter, `limit` aside.
    pub fn matches(&self, event: &OrderEvent) -> bool {
        fn tag_matches(values: &Option<Vec<String>>, event: &OrderEvent, tag: &str) -> bool {
            match values {
                Some(values) => event.tag(tag).map_or(false, |v| values.iter().any(|x| x == v)),
                None => true,
            }
        }

        self.ids.as_ref().map_or(true, |ids| ids.contains(&event.id))
            && self
                .kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&event.kind))
            && tag_matches(&self.inscription_ids, event, TAG_INSCRIPTION)
            && tag_matches(&self.outpoints, event, TAG_OUTPOINT)
            && tag_matches(&self.order_types, event, TAG_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event(OrderEvent),
    /// Every stored event has been sent, the following ones are new.
    EndOfStoredEvents,
}

/// Connection to a single relay.
#[async_trait::async_trait]
pub trait RelayConnection: Send + Sync {
    fn url(&self) -> &str;

    /// Publishes `event`, resolving once the relay accepted it.
    async fn publish(&self, event: &OrderEvent) -> OrdResult<()>;

    /// Stored events matching `filter`.
    async fn list(&self, filter: &Filter) -> OrdResult<Vec<OrderEvent>>;

    /// Stored and new events matching `filter`, until the receiver is dropped.
    async fn subscribe(&self, filter: &Filter) -> OrdResult<mpsc::Receiver<RelayMessage>>;
}

/// Live subscription over a [`RelayPool`].
///
/// Dropping it closes every relay stream.
pub struct Subscription {
    receiver: mpsc::Receiver<RelayMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    /// Next event, or `None` once every relay stream ended.
    pub async fn next(&mut self) -> Option<RelayMessage> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The set of relays making up the order book.
#[derive(Clone)]
pub struct RelayPool {
    relays: Vec<Arc<dyn RelayConnection>>,
}

impl RelayPool {
    pub fn new(relays: Vec<Arc<dyn RelayConnection>>) -> Self {
        Self { relays }
    }

    /// Pool of websocket relays. Connections are opened on use.
    pub fn connect(urls: &[String]) -> Self {
        Self::new(
            urls.iter()
                .map(|url| Arc::new(WsRelay::new(url.clone())) as Arc<dyn RelayConnection>)
                .collect(),
        )
    }

    pub fn urls(&self) -> Vec<&str> {
        self.relays.iter().map(|relay| relay.url()).collect()
    }

    /// Publishes `event` to every relay concurrently, returning the url of the first
    /// relay accepting it.
    ///
    /// Pending attempts are dropped once one succeeds; fails only if every relay did.
    pub async fn publish(&self, event: &OrderEvent) -> OrdResult<String> {
        let mut attempts: FuturesUnordered<_> = self
            .relays
            .iter()
            .map(|relay| async move { relay.publish(event).await.map(|_| relay.url()) })
            .collect();

        let mut errors = Vec::new();
        while let Some(attempt) = attempts.next().await {
            match attempt {
                Ok(url) => {
                    info!("event {} published on {url}", event.id);
                    return Ok(url.to_string());
                }
                Err(err) => {
                    warn!("failed to publish event {}: {err}", event.id);
                    errors.push(err.to_string());
                }
            }
        }

        Err(OrdError::Network(format!(
            "event {} rejected by every relay: [{}]",
            event.id,
            errors.join("; ")
        )))
    }

    /// Stored events matching `filter` from every relay, without duplicates.
    ///
    /// Relays failing are skipped, unless all of them fail.
    pub async fn list(&self, filter: &Filter) -> OrdResult<Vec<OrderEvent>> {
        let results = join_all(self.relays.iter().map(|relay| relay.list(filter))).await;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut failures = 0;
        for (relay, result) in self.relays.iter().zip(results) {
            match result {
                Ok(relay_events) => events.extend(
                    relay_events
                        .into_iter()
                        .filter(|event| seen.insert(event.id.clone())),
                ),
                Err(err) => {
                    warn!("failed to list events from {}: {err}", relay.url());
                    failures += 1;
                }
            }
        }

        if failures == self.relays.len() {
            return Err(OrdError::Network("every relay failed".to_string()));
        }

        Ok(events)
    }

    /// Subscribes to every relay concurrently, merging the streams.
    ///
    /// Events are forwarded once, whichever relay delivers them first; only the last
    /// [`SEEN_EVENTS_CAPACITY`] ids are remembered for that. `EndOfStoredEvents` is
    /// forwarded once per relay, as each one finishes replaying its stored events.
    /// Relays refusing the subscription are skipped, unless all of them do.
    pub async fn subscribe(&self, filter: &Filter) -> OrdResult<Subscription> {
        let (merged_tx, mut merged_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut tasks = Vec::with_capacity(self.relays.len() + 1);

        let results = join_all(self.relays.iter().map(|relay| relay.subscribe(filter))).await;
        for (relay, result) in self.relays.iter().zip(results) {
            let mut receiver = match result {
                Ok(receiver) => receiver,
                Err(err) => {
                    warn!("failed to subscribe to {}: {err}", relay.url());
                    continue;
                }
            };
            let merged_tx = merged_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = receiver.recv().await {
                    if merged_tx.send(message).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(merged_tx);

        if tasks.is_empty() {
            return Err(OrdError::Network("no relay accepted the subscription".to_string()));
        }

        let (tx, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tasks.push(tokio::spawn(async move {
            let mut seen = RecentIds::new(SEEN_EVENTS_CAPACITY);
            while let Some(message) = merged_rx.recv().await {
                let forward = match &message {
                    RelayMessage::Event(event) => seen.insert(&event.id),
                    RelayMessage::EndOfStoredEvents => true,
                };
                if forward && tx.send(message).await.is_err() {
                    break;
                }
            }
        }));

        Ok(Subscription { receiver, tasks })
    }
}
