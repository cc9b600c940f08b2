//! Marketplace session: the trade flows of one wallet.

use std::collections::HashSet;
use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, OutPoint, Txid};
use futures::future::try_join_all;

use crate::auction::{AuctionSchedule, DutchAuction};
use crate::config::MarketConfig;
use crate::inscription::{InscriptionId, InscriptionRef};
use crate::oracle::{
    resolve_outpoints, ArtifactOracle, BatchResolution, ChainOracle, EsploraClient,
    OrdExplorerClient,
};
use crate::orderbook::{
    unix_now, BidOrder, Filter, Order, OrderBook, OrderEvent, OrderSubscription, OrderTags,
    OrderType, RelayPool, SaleOrder,
};
use crate::error::Shortfall;
use crate::utils::fees::{checked_sum, output_value, partial_output_value, sat_to_btc};
use crate::wallet::builder::BUY_DUMMY_INPUTS;
use crate::wallet::psbt::{decode_psbt, encode_psbt, PsbtEncoding};
use crate::wallet::{
    select_utxos, BidArgs, BuyArgs, FundingInput, ListingArgs, MarketTransactionBuilder,
    SelectionRequest, SendArgs, Signer, Utxo, UtxoStatus,
};
use crate::{OrdError, OrdResult};

/// An auction whose tiers are all signed.
#[derive(Debug, Clone)]
pub struct PreparedAuction {
    pub auction: DutchAuction,
    /// Events of the tiers not due yet, to publish at their scheduled time.
    pub pending: Vec<OrderEvent>,
}

/// Everything a wallet needs to trade on the marketplace.
///
/// The signer is chosen once here and used by every flow.
pub struct MarketSession {
    config: MarketConfig,
    signer: Arc<dyn Signer>,
    chain: Arc<dyn ChainOracle>,
    artifacts: Arc<dyn ArtifactOracle>,
    order_book: OrderBook,
    builder: MarketTransactionBuilder,
}

impl MarketSession {
    pub fn new(
        config: MarketConfig,
        signer: Arc<dyn Signer>,
        chain: Arc<dyn ChainOracle>,
        artifacts: Arc<dyn ArtifactOracle>,
        relays: RelayPool,
    ) -> OrdResult<Self> {
        config.validate()?;
        let order_book = OrderBook::new(&config, relays, chain.clone(), artifacts.clone());
        let builder = MarketTransactionBuilder::from_config(&config);

        Ok(Self {
            config,
            signer,
            chain,
            artifacts,
            order_book,
            builder,
        })
    }

    /// Session over the configured HTTP endpoints and websocket relays.
    pub fn connect(config: MarketConfig, signer: Arc<dyn Signer>) -> OrdResult<Self> {
        let chain = Arc::new(EsploraClient::new(config.esplora_url.clone()));
        let artifacts = Arc::new(OrdExplorerClient::new(
            config.explorer_url.clone(),
            config.outpoint_api_url.clone(),
        ));
        let relays = RelayPool::connect(&config.relays);
        info!(
            "connecting to {} on {} relays",
            config.network_name(),
            config.relays.len()
        );

        Self::new(config, signer, chain, artifacts, relays)
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn order_book(&self) -> &OrderBook {
        &self.order_book
    }

    pub fn address(&self) -> &Address {
        &self.signer.address_info().address
    }

    /// Fee rate of the configured level, in sat/vB.
    pub async fn fee_rate(&self) -> OrdResult<f64> {
        let rates = self.chain.recommended_fees().await?;
        Ok(rates.select(self.config.fee_level))
    }

    pub async fn wallet_utxos(&self) -> OrdResult<Vec<Utxo>> {
        self.chain.address_utxos(self.address()).await
    }

    pub async fn funding_input(&self, utxo: Utxo) -> OrdResult<FundingInput> {
        let previous_tx = self.chain.transaction(&utxo.txid).await?;
        FundingInput::new(utxo, previous_tx)
    }

    /// Funding input spending `outpoint`, whoever owns it.
    async fn outpoint_input(&self, outpoint: OutPoint) -> OrdResult<FundingInput> {
        let previous_tx = self.chain.transaction(&outpoint.txid).await?;
        let value = previous_tx
            .output
            .get(outpoint.vout as usize)
            .ok_or(OrdError::InputNotFound(outpoint.vout as usize))?
            .value;
        let utxo = Utxo {
            txid: outpoint.txid,
            vout: outpoint.vout,
            value: value.to_sat(),
            status: UtxoStatus::default(),
        };

        FundingInput::new(utxo, previous_tx)
    }

    pub async fn resolve_outpoints(&self, ids: &[InscriptionId]) -> BatchResolution {
        resolve_outpoints(
            self.artifacts.as_ref(),
            ids,
            self.config.outpoint_batch_size,
        )
        .await
    }

    async fn order_event(
        &self,
        order_type: OrderType,
        inscription: &InscriptionRef,
        price: Amount,
        content: String,
        created_at: u64,
    ) -> OrdResult<OrderEvent> {
        let tags = OrderTags {
            network: self.config.network_name().to_string(),
            order_type,
            inscription_id: inscription.inscription_id,
            outpoint: inscription.outpoint,
            price,
            exchange: self.config.exchange_tag.clone(),
        };

        OrderEvent::new_unsigned(
            self.config.nostr_kind,
            self.signer.event_public_key(),
            created_at,
            tags.into_tags(),
            content,
        )?
        .sign_with(self.signer.as_ref())
        .await
    }

    /// Signed listing of `inscription` at `price`, base64 encoded.
    async fn signed_listing(
        &self,
        inscription_input: &FundingInput,
        price: Amount,
    ) -> OrdResult<String> {
        let mut psbt = self.builder.build_listing(
            ListingArgs {
                inscription_input: inscription_input.clone(),
                payment_address: self.address().clone(),
                price,
            },
            self.signer.as_ref(),
        )?;
        self.builder
            .sign_listing(&mut psbt, self.signer.as_ref())
            .await?;

        Ok(encode_psbt(&psbt, PsbtEncoding::Base64))
    }

    /// Lists an inscription of the wallet for sale at `price` and publishes the order.
    pub async fn list_for_sale(
        &self,
        inscription_id: InscriptionId,
        price: Amount,
    ) -> OrdResult<OrderEvent> {
        let inscription = self.artifacts.inscription(&inscription_id).await?;
        let inscription_input = self.outpoint_input(inscription.outpoint).await?;
        let content = self.signed_listing(&inscription_input, price).await?;

        let event = self
            .order_event(OrderType::Sell, &inscription, price, content, unix_now())
            .await?;
        self.order_book.relays().publish(&event).await?;
        info!("listed {inscription_id} for {price}");

        Ok(event)
    }

    /// Small confirmed outputs of the wallet usable as dummy inputs.
    async fn dummy_inputs(&self, utxos: &[Utxo]) -> OrdResult<Vec<FundingInput>> {
        let mut dummies = Vec::with_capacity(BUY_DUMMY_INPUTS);
        for utxo in utxos {
            if dummies.len() == BUY_DUMMY_INPUTS {
                break;
            }
            if !utxo.status.confirmed || utxo.value > self.config.dummy_utxo_value {
                continue;
            }
            if self.artifacts.carries_inscription(&utxo.outpoint()).await? {
                continue;
            }
            dummies.push(self.funding_input(utxo.clone()).await?);
        }

        if dummies.len() < BUY_DUMMY_INPUTS {
            warn!(
                "{} has {} dummy utxos, {BUY_DUMMY_INPUTS} needed",
                self.address(),
                dummies.len()
            );
            return Err(OrdError::MissingDummyUtxo);
        }

        Ok(dummies)
    }

    /// Buys a listed inscription and broadcasts the transaction.
    ///
    /// The order is validated again first.
    pub async fn buy(&self, order: &SaleOrder) -> OrdResult<Txid> {
        let Order::Sale(order) = self.order_book.order_information(&order.event).await? else {
            return Err(OrdError::InvalidOrder("not a sell order".to_string()));
        };
        let seller_psbt = decode_psbt(&order.event.content)?;
        let fee_rate = self.fee_rate().await?;
        let utxos = self.wallet_utxos().await?;

        let dummy_inputs = self.dummy_inputs(&utxos).await?;
        let total_dummy = checked_sum(
            dummy_inputs
                .iter()
                .map(|input| Amount::from_sat(input.utxo.value)),
        )
        .ok_or_else(|| OrdError::InvalidOrder("dummy value overflows".to_string()))?;
        let amount = order.value.checked_add(total_dummy).ok_or_else(|| {
            OrdError::InsufficientFunds(Shortfall::new(
                order.value,
                Amount::ZERO,
                total_dummy,
                Amount::MAX,
            ))
        })?;

        let mut request =
            SelectionRequest::new(utxos, amount, BUY_DUMMY_INPUTS + 1, 3, fee_rate);
        request.min_value = self.config.min_output_value;
        request
            .exclude
            .extend(dummy_inputs.iter().map(|input| input.utxo.outpoint()));
        let selection = select_utxos(request, self.artifacts.as_ref()).await?;
        let payment_inputs = try_join_all(
            selection
                .selected_utxos
                .into_iter()
                .map(|utxo| self.funding_input(utxo)),
        )
        .await?;

        let mut psbt = self.builder.build_buy(
            BuyArgs {
                seller_psbt,
                dummy_inputs,
                payment_inputs,
                receiver_address: self.address().clone(),
                change_address: self.address().clone(),
                fee_rate,
            },
            self.signer.as_ref(),
        )?;
        let tx = self
            .builder
            .sign_buyer_inputs(&mut psbt, self.signer.as_ref())
            .await?;

        let txid = self.chain.broadcast(&tx).await?;
        info!(
            "bought {} for {} BTC: {txid}",
            order.inscription_id,
            sat_to_btc(order.value)
        );

        Ok(txid)
    }

    /// Bids `bid_price` on an inscription owned by someone else and publishes the offer.
    pub async fn place_bid(
        &self,
        inscription_id: InscriptionId,
        bid_price: Amount,
    ) -> OrdResult<OrderEvent> {
        let inscription = self.artifacts.inscription(&inscription_id).await?;
        let owner_address = inscription
            .owner
            .as_deref()
            .ok_or_else(|| {
                OrdError::InvalidOrder(format!("owner of {inscription_id} is unknown"))
            })?
            .parse::<Address<NetworkUnchecked>>()?
            .require_network(self.config.network)?;
        let inscription_input = self.outpoint_input(inscription.outpoint).await?;
        let fee_rate = self.fee_rate().await?;

        // the inscription value pays for part of the artifact output
        let amount = bid_price
            .checked_add(Amount::from_sat(self.config.artifact_output_value))
            .ok_or_else(|| {
                OrdError::InsufficientFunds(Shortfall::new(
                    bid_price,
                    Amount::ZERO,
                    inscription.value,
                    Amount::MAX,
                ))
            })?
            .checked_sub(inscription.value)
            .unwrap_or(Amount::ZERO);
        let mut request =
            SelectionRequest::new(self.wallet_utxos().await?, amount, 1, 2, fee_rate);
        request.min_value = self.config.min_output_value;
        request.exclude.insert(inscription.outpoint);
        let selection = select_utxos(request, self.artifacts.as_ref()).await?;
        let payment_inputs = try_join_all(
            selection
                .selected_utxos
                .into_iter()
                .map(|utxo| self.funding_input(utxo)),
        )
        .await?;

        let mut psbt = self.builder.build_bid(
            BidArgs {
                inscription_input,
                owner_address,
                receiver_address: self.address().clone(),
                change_address: self.address().clone(),
                bid_price,
                payment_inputs,
                fee_rate,
            },
            self.signer.as_ref(),
        )?;
        self.builder
            .sign_bid(&mut psbt, self.signer.as_ref())
            .await?;

        let event = self
            .order_event(
                OrderType::Buy,
                &inscription,
                bid_price,
                encode_psbt(&psbt, PsbtEncoding::Base64),
                unix_now(),
            )
            .await?;
        self.order_book.relays().publish(&event).await?;
        info!("bid {bid_price} on {inscription_id}");

        Ok(event)
    }

    /// Accepts a bid on an inscription of the wallet and broadcasts the transaction.
    pub async fn accept_bid(&self, bid: &BidOrder) -> OrdResult<Txid> {
        let Order::Bid(bid) = self.order_book.order_information(&bid.event).await? else {
            return Err(OrdError::InvalidOrder("not a buy order".to_string()));
        };
        let psbt = decode_psbt(&bid.event.content)?;
        let tx = self
            .builder
            .accept_bid(psbt, self.signer.as_ref())
            .await?;

        self.chain.broadcast(&tx).await
    }

    /// Sends `utxo` to `destination` as a single input transaction and broadcasts it.
    ///
    /// Without an explicit `value`, the whole output is sent minus the fee of the assumed
    /// transaction size.
    pub async fn send_utxo(
        &self,
        utxo: Utxo,
        destination: Address,
        value: Option<Amount>,
    ) -> OrdResult<Txid> {
        let fee_rate = self.fee_rate().await?;
        let value = output_value(&utxo, fee_rate, value, self.config.assumed_tx_bytes)?;
        if value == Amount::ZERO {
            return Err(OrdError::InvalidOrder(format!(
                "nothing left to send out of {}",
                utxo.outpoint()
            )));
        }

        self.send(SendArgs {
            input: self.funding_input(utxo).await?,
            destination,
            value,
            change: None,
        })
        .await
    }

    /// Pays `amount` to `destination` out of `utxo` alone, the remainder going back to
    /// the wallet.
    pub async fn pay_from_utxo(
        &self,
        utxo: Utxo,
        destination: Address,
        amount: Amount,
    ) -> OrdResult<Txid> {
        let fee_rate = self.fee_rate().await?;
        let change = partial_output_value(
            Amount::from_sat(utxo.value),
            fee_rate,
            amount,
            self.config.assumed_tx_bytes,
        )?;
        let change = (change > Amount::ZERO).then(|| (self.address().clone(), change));

        self.send(SendArgs {
            input: self.funding_input(utxo).await?,
            destination,
            value: amount,
            change,
        })
        .await
    }

    async fn send(&self, args: SendArgs) -> OrdResult<Txid> {
        let outpoint = args.input.utxo.outpoint();
        let mut psbt = self.builder.build_send(args, self.signer.as_ref())?;
        let tx = self
            .builder
            .sign_send(&mut psbt, self.signer.as_ref())
            .await?;

        let txid = self.chain.broadcast(&tx).await?;
        info!("spent {outpoint}: {txid}");

        Ok(txid)
    }

    pub async fn best_live_order(&self, outpoint: OutPoint) -> OrdResult<Option<SaleOrder>> {
        self.order_book.best_live_order(outpoint).await
    }

    pub async fn list_orders(&self, filter: Filter) -> OrdResult<Vec<Order>> {
        self.order_book.list_orders(filter).await
    }

    pub async fn subscribe_orders<F, E>(
        &self,
        filter: Filter,
        on_order: F,
        on_eose: E,
    ) -> OrdResult<OrderSubscription>
    where
        F: FnMut(Order) + Send + 'static,
        E: FnMut() + Send + 'static,
    {
        self.order_book
            .subscribe_orders(filter, on_order, on_eose)
            .await
    }

    /// Signs a listing and an event for every tier of a Dutch auction.
    ///
    /// Each event is dated at its tier's scheduled time. The tiers already due are
    /// published; the others are returned, to be published when their time comes.
    pub async fn prepare_auction(
        &self,
        inscription_id: InscriptionId,
        start_price: Amount,
        reserve_price: Amount,
        decrease_amount: Amount,
        time_between: u64,
        start_time: u64,
    ) -> OrdResult<PreparedAuction> {
        let mut schedule = AuctionSchedule::generate(
            start_price.to_sat(),
            reserve_price.to_sat(),
            decrease_amount.to_sat(),
            time_between,
            start_time,
        )?;
        let inscription = self.artifacts.inscription(&inscription_id).await?;
        let inscription_input = self.outpoint_input(inscription.outpoint).await?;

        let mut events = Vec::with_capacity(schedule.tiers.len());
        for tier in schedule.tiers.iter_mut() {
            let price = Amount::from_sat(tier.price);
            let content = self.signed_listing(&inscription_input, price).await?;
            let event = self
                .order_event(
                    OrderType::Sell,
                    &inscription,
                    price,
                    content.clone(),
                    tier.scheduled_time,
                )
                .await?;
            tier.signed_psbt = Some(content);
            tier.nostr_event_id = Some(event.id.clone());
            events.push(event);
        }

        let due: HashSet<&str> = schedule
            .due(unix_now())
            .filter_map(|tier| tier.nostr_event_id.as_deref())
            .collect();
        let (due, pending): (Vec<OrderEvent>, Vec<OrderEvent>) = events
            .into_iter()
            .partition(|event| due.contains(event.id.as_str()));
        for event in &due {
            self.order_book.relays().publish(event).await?;
        }
        info!(
            "auction of {inscription_id}: {} tiers, {} pending",
            schedule.tiers.len(),
            pending.len()
        );

        let auction =
            schedule.into_auction(inscription_id, decrease_amount.to_sat(), time_between)?;
        Ok(PreparedAuction { auction, pending })
    }

    /// Publishes an event, returning the relay that accepted it.
    pub async fn publish(&self, event: &OrderEvent) -> OrdResult<String> {
        self.order_book.relays().publish(event).await
    }
}
