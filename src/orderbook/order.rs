use std::sync::Arc;

use bitcoin::{Address, Amount, Network, OutPoint};
use tokio::task::JoinHandle;

use super::event::{OrderEvent, OrderType};
use super::relay::{Filter, RelayMessage, RelayPool};
use crate::config::MarketConfig;
use crate::inscription::InscriptionId;
use crate::oracle::{ArtifactOracle, ChainOracle};
use crate::wallet::psbt::{decode_psbt, psbt_price, validate_bid_tx, validate_partial_tx};
use crate::{OrdError, OrdResult};

/// A validated sell order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleOrder {
    pub event: OrderEvent,
    pub inscription_id: InscriptionId,
    pub outpoint: OutPoint,
    /// Price actually asked by the signed listing.
    pub value: Amount,
    /// Price of the `s` tag; informative only.
    pub advertised_price: Option<Amount>,
}

/// A validated buy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidOrder {
    pub event: OrderEvent,
    pub inscription_id: InscriptionId,
    pub outpoint: OutPoint,
    pub bid_price: Amount,
    pub owner_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Sale(SaleOrder),
    Bid(BidOrder),
}

impl Order {
    pub fn event(&self) -> &OrderEvent {
        match self {
            Self::Sale(sale) => &sale.event,
            Self::Bid(bid) => &bid.event,
        }
    }
}

/// Handle of an order subscription. Dropping it ends the subscription.
pub struct OrderSubscription {
    task: JoinHandle<()>,
}

impl OrderSubscription {
    pub fn unsubscribe(self) {
        drop(self)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for OrderSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Validating view over the orders published on the relays.
///
/// Nothing is cached: every read goes through the relays and the chain again.
#[derive(Clone)]
pub struct OrderBook {
    relays: RelayPool,
    chain: Arc<dyn ChainOracle>,
    artifacts: Arc<dyn ArtifactOracle>,
    network: Network,
    kind: u16,
    verify_signatures: bool,
    order_limit: usize,
}

impl OrderBook {
    pub fn new(
        config: &MarketConfig,
        relays: RelayPool,
        chain: Arc<dyn ChainOracle>,
        artifacts: Arc<dyn ArtifactOracle>,
    ) -> Self {
        Self {
            relays,
            chain,
            artifacts,
            network: config.network,
            kind: config.nostr_kind,
            verify_signatures: config.verify_signatures,
            order_limit: config.order_limit,
        }
    }

    pub fn relays(&self) -> &RelayPool {
        &self.relays
    }

    /// Validates `event` into an order.
    ///
    /// The `u` tag must be the output currently carrying the inscription of the `i` tag.
    pub async fn order_information(&self, event: &OrderEvent) -> OrdResult<Order> {
        if event.kind != self.kind {
            return Err(OrdError::InvalidOrder(format!(
                "unexpected event kind {}",
                event.kind
            )));
        }
        let psbt = decode_psbt(&event.content)
            .map_err(|e| OrdError::InvalidOrder(format!("invalid psbt: {e}")))?;
        let inscription_id = event.inscription_id()?;
        let outpoint = event.outpoint()?;

        let order = match event.order_type()? {
            OrderType::Sell => {
                validate_partial_tx(&psbt, outpoint, self.verify_signatures)?;
                Order::Sale(SaleOrder {
                    event: event.clone(),
                    inscription_id,
                    outpoint,
                    value: psbt_price(&psbt)?,
                    advertised_price: event.advertised_price(),
                })
            }
            OrderType::Buy => {
                let (bid_price, owner_script) =
                    validate_bid_tx(&psbt, outpoint, self.verify_signatures)?;
                let owner_address = Address::from_script(&owner_script, self.network)
                    .map_err(|e| OrdError::InvalidOrder(format!("invalid owner output: {e}")))?;
                Order::Bid(BidOrder {
                    event: event.clone(),
                    inscription_id,
                    outpoint,
                    bid_price,
                    owner_address,
                })
            }
        };

        if self.chain.is_spent(&outpoint).await? {
            return Err(OrdError::StaleOrder(outpoint));
        }
        let inscription = self.artifacts.inscription(&inscription_id).await?;
        if inscription.outpoint != outpoint {
            return Err(OrdError::InvalidOrder(format!(
                "{inscription_id} is at {}, not {outpoint}",
                inscription.outpoint
            )));
        }
        if self.verify_signatures {
            event.verify()?;
        }

        Ok(order)
    }

    /// Cheapest valid listing of `outpoint`, if any.
    ///
    /// Listings are tried by ascending `s` tag; the first one whose signed price matches
    /// its tag wins. Invalid listings are skipped.
    pub async fn best_live_order(&self, outpoint: OutPoint) -> OrdResult<Option<SaleOrder>> {
        let filter = Filter::default()
            .kind(self.kind)
            .outpoint(outpoint)
            .order_type(OrderType::Sell);
        let mut candidates: Vec<(Amount, OrderEvent)> = self
            .relays
            .list(&filter)
            .await?
            .into_iter()
            .filter_map(|event| event.advertised_price().map(|price| (price, event)))
            .collect();
        candidates.sort_by_key(|(price, _)| *price);

        for (price, event) in candidates {
            match self.order_information(&event).await {
                Ok(Order::Sale(sale)) if sale.value == price => return Ok(Some(sale)),
                Ok(_) => debug!("skipping listing {}: price mismatch", event.id),
                Err(err) => debug!("skipping listing {}: {err}", event.id),
            }
        }

        Ok(None)
    }

    /// Latest orders matching `filter`, validated. Invalid ones are dropped.
    pub async fn list_orders(&self, filter: Filter) -> OrdResult<Vec<Order>> {
        let filter = Filter {
            kinds: Some(vec![self.kind]),
            limit: filter.limit.or(Some(self.order_limit)),
            ..filter
        };

        let mut orders = Vec::new();
        for event in self.relays.list(&filter).await? {
            match self.order_information(&event).await {
                Ok(order) => orders.push(order),
                Err(err) => debug!("dropping event {}: {err}", event.id),
            }
        }

        Ok(orders)
    }

    /// Streams validated orders matching `filter` to `on_order`.
    ///
    /// `on_eose` is called once per relay, when it has delivered its stored orders.
    /// Events failing validation are dropped without ending the subscription.
    pub async fn subscribe_orders<F, E>(
        &self,
        filter: Filter,
        mut on_order: F,
        mut on_eose: E,
    ) -> OrdResult<OrderSubscription>
    where
        F: FnMut(Order) + Send + 'static,
        E: FnMut() + Send + 'static,
    {
        let filter = Filter {
            kinds: Some(vec![self.kind]),
            limit: filter.limit.or(Some(self.order_limit)),
            ..filter
        };
        let mut subscription = self.relays.subscribe(&filter).await?;
        let book = self.clone();

        let task = tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                match message {
                    RelayMessage::Event(event) => match book.order_information(&event).await {
                        Ok(order) => on_order(order),
                        Err(err) => debug!("dropping event {}: {err}", event.id),
                    },
                    RelayMessage::EndOfStoredEvents => on_eose(),
                }
            }
        });

        Ok(OrderSubscription { task })
    }
}
