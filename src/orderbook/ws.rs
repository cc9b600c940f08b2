//! NIP-01 relay over a websocket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::event::OrderEvent;
use super::relay::{Filter, RelayConnection, RelayMessage, SUBSCRIPTION_BUFFER};
use crate::{OrdError, OrdResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_subscription_id() -> String {
    format!(
        "ord-market-{}",
        SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Message received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event {
        subscription_id: String,
        event: OrderEvent,
    },
    EndOfStoredEvents(String),
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    Notice(String),
}

pub fn event_message(event: &OrderEvent) -> OrdResult<String> {
    Ok(serde_json::to_string(&("EVENT", event))?)
}

pub fn req_message(subscription_id: &str, filter: &Filter) -> OrdResult<String> {
    Ok(serde_json::to_string(&("REQ", subscription_id, filter))?)
}

pub fn close_message(subscription_id: &str) -> OrdResult<String> {
    Ok(serde_json::to_string(&("CLOSE", subscription_id))?)
}

/// Parses a relay message. Unknown message types yield `None`.
pub fn parse_relay_message(text: &str) -> OrdResult<Option<RelayFrame>> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(OrdError::Network(format!("malformed relay message: {text}")));
    };
    let string_at = |index: usize| -> OrdResult<String> {
        items
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OrdError::Network(format!("malformed relay message: {text}")))
    };

    let frame = match string_at(0)?.as_str() {
        "EVENT" => {
            let event = items
                .get(2)
                .cloned()
                .ok_or_else(|| OrdError::Network(format!("malformed relay message: {text}")))?;
            RelayFrame::Event {
                subscription_id: string_at(1)?,
                event: serde_json::from_value(event)?,
            }
        }
        "EOSE" => RelayFrame::EndOfStoredEvents(string_at(1)?),
        "OK" => RelayFrame::Ok {
            event_id: string_at(1)?,
            accepted: items.get(2).and_then(Value::as_bool).unwrap_or(false),
            message: string_at(3).unwrap_or_default(),
        },
        "NOTICE" => RelayFrame::Notice(string_at(1)?),
        _ => return Ok(None),
    };

    Ok(Some(frame))
}

/// A relay reached over a websocket.
///
/// Every operation opens its own connection.
#[derive(Debug, Clone)]
pub struct WsRelay {
    url: String,
    timeout: Duration,
}

impl WsRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn with_timeout_of<T>(
        &self,
        fut: impl std::future::Future<Output = OrdResult<T>>,
    ) -> OrdResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| OrdError::Network(format!("{} timed out", self.url)))?
    }
}

#[async_trait::async_trait]
impl RelayConnection for WsRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &OrderEvent) -> OrdResult<()> {
        self.with_timeout_of(async {
            let (mut ws, _) = connect_async(self.url.as_str()).await?;
            ws.send(Message::Text(event_message(event)?)).await?;

            while let Some(message) = ws.next().await {
                let Message::Text(text) = message? else {
                    continue;
                };
                match parse_relay_message(&text)? {
                    Some(RelayFrame::Ok {
                        event_id,
                        accepted,
                        message,
                    }) if event_id == event.id => {
                        let _ = ws.close(None).await;
                        return if accepted {
                            Ok(())
                        } else {
                            Err(OrdError::Network(format!(
                                "{} rejected event: {message}",
                                self.url
                            )))
                        };
                    }
                    Some(RelayFrame::Notice(notice)) => debug!("{}: {notice}", self.url),
                    _ => {}
                }
            }

            Err(OrdError::Network(format!(
                "{} closed before acknowledging",
                self.url
            )))
        })
        .await
    }

    async fn list(&self, filter: &Filter) -> OrdResult<Vec<OrderEvent>> {
        self.with_timeout_of(async {
            let subscription_id = next_subscription_id();
            let (mut ws, _) = connect_async(self.url.as_str()).await?;
            ws.send(Message::Text(req_message(&subscription_id, filter)?))
                .await?;

            let mut events = Vec::new();
            while let Some(message) = ws.next().await {
                let Message::Text(text) = message? else {
                    continue;
                };
                match parse_relay_message(&text)? {
                    Some(RelayFrame::Event {
                        subscription_id: id,
                        event,
                    }) if id == subscription_id => events.push(event),
                    Some(RelayFrame::EndOfStoredEvents(id)) if id == subscription_id => {
                        let _ = ws.send(Message::Text(close_message(&subscription_id)?)).await;
                        let _ = ws.close(None).await;
                        return Ok(events);
                    }
                    Some(RelayFrame::Notice(notice)) => debug!("{}: {notice}", self.url),
                    _ => {}
                }
            }

            Ok(events)
        })
        .await
    }

    async fn subscribe(&self, filter: &Filter) -> OrdResult<mpsc::Receiver<RelayMessage>> {
        let subscription_id = next_subscription_id();
        let (mut ws, _) = self
            .with_timeout_of(async { Ok(connect_async(self.url.as_str()).await?) })
            .await?;
        ws.send(Message::Text(req_message(&subscription_id, filter)?))
            .await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let url = self.url.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = tx.closed() => break,
                    message = ws.next() => message,
                };
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!("{url}: {err}");
                        break;
                    }
                    None => break,
                };

                let forward = match parse_relay_message(&text) {
                    Ok(Some(RelayFrame::Event {
                        subscription_id: id,
                        event,
                    })) if id == subscription_id => RelayMessage::Event(event),
                    Ok(Some(RelayFrame::EndOfStoredEvents(id))) if id == subscription_id => {
                        RelayMessage::EndOfStoredEvents
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        debug!("{url}: dropping message: {err}");
                        continue;
                    }
                };
                if tx.send(forward).await.is_err() {
                    break;
                }
            }

            if let Ok(close) = close_message(&subscription_id) {
                let _ = ws.send(Message::Text(close)).await;
            }
            let _ = ws.close(None).await;
            debug!("{url}: subscription {subscription_id} closed");
        });

        Ok(rx)
    }
}
