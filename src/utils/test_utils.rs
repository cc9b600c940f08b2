//! Fixtures and in-memory collaborators for the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::SecretKey;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, PrivateKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use tokio::sync::mpsc;

use crate::config::MarketConfig;
use crate::inscription::{InscriptionId, InscriptionRef};
use crate::oracle::{ArtifactOracle, ChainOracle, FeeRates};
use crate::orderbook::{Filter, OrderEvent, OrderTags, OrderType, RelayConnection, RelayMessage};
use crate::utils::constants::NOSTR_KIND_INSCRIPTION;
use crate::utils::sha256sum;
use crate::wallet::psbt::{encode_psbt, PsbtEncoding};
use crate::wallet::{FundingInput, ListingArgs, LocalSigner, MarketTransactionBuilder, Signer};
use crate::wallet::{Utxo, UtxoStatus};
use crate::{OrdError, OrdResult};

pub const TEST_NETWORK: Network = Network::Regtest;

pub fn test_config() -> MarketConfig {
    MarketConfig {
        relays: vec!["wss://relay.test".to_string()],
        ..MarketConfig::for_network(TEST_NETWORK)
    }
}

pub fn p2tr_signer(seed: u8) -> LocalSigner {
    let secret_key = SecretKey::from_slice(&[seed; 32]).unwrap();
    LocalSigner::p2tr(secret_key, TEST_NETWORK)
}

pub fn p2wpkh_signer(seed: u8) -> LocalSigner {
    let secret_key = SecretKey::from_slice(&[seed; 32]).unwrap();
    LocalSigner::p2wpkh(PrivateKey::new(secret_key, TEST_NETWORK), TEST_NETWORK).unwrap()
}

/// An output of `value` sats paying `signer`, with a made up parent transaction.
///
/// Distinct `nonce`s give distinct outputs.
pub fn funding_input(signer: &dyn Signer, value: u64, nonce: u32) -> FundingInput {
    let previous_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::from_byte_array(sha256sum(&nonce.to_le_bytes())),
                vout: nonce,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: signer.address_info().script_pubkey.clone(),
        }],
    };
    let utxo = Utxo {
        txid: previous_tx.txid(),
        vout: 0,
        value,
        status: UtxoStatus::confirmed(800_000),
    };

    FundingInput::new(utxo, previous_tx).unwrap()
}

/// A confirmed utxo, without parent transaction.
pub fn utxo(n: u8, value: u64) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([n; 32]),
        vout: 0,
        value,
        status: UtxoStatus::confirmed(800_000),
    }
}

pub fn inscription_id(n: u32) -> InscriptionId {
    InscriptionId {
        txid: Txid::from_byte_array(sha256sum(format!("inscription-{n}").as_bytes())),
        index: 0,
    }
}

/// A signed order event whose content is not a real listing.
pub async fn test_event(n: u32, price: u64, order_type: &str) -> OrderEvent {
    let signer = p2tr_signer(1);
    let id = inscription_id(n);
    let tags = OrderTags {
        network: "testnet".to_string(),
        order_type: order_type.parse().unwrap(),
        inscription_id: id,
        outpoint: OutPoint {
            txid: id.txid,
            vout: 0,
        },
        price: Amount::from_sat(price),
        exchange: "deezy".to_string(),
    };

    OrderEvent::new_unsigned(
        NOSTR_KIND_INSCRIPTION,
        signer.event_public_key(),
        1_700_000_000 + u64::from(n),
        tags.into_tags(),
        format!("cHNidP8B{n}"),
    )
    .unwrap()
    .sign_with(&signer)
    .await
    .unwrap()
}

/// A real listing, signed by `p2tr_signer(seed)`.
pub struct TestListing {
    pub seed: u8,
    pub inscription: FundingInput,
    pub psbt: Psbt,
}

impl TestListing {
    pub async fn new(seed: u8, price: u64) -> Self {
        let seller = p2tr_signer(seed);
        let inscription = funding_input(&seller, 10_000, 1_000 + u32::from(seed));
        Self::signed(seed, inscription, price).await
    }

    async fn signed(seed: u8, inscription: FundingInput, price: u64) -> Self {
        let seller = p2tr_signer(seed);
        let builder = MarketTransactionBuilder::default();
        let mut psbt = builder
            .build_listing(
                ListingArgs {
                    inscription_input: inscription.clone(),
                    payment_address: seller.address_info().address.clone(),
                    price: Amount::from_sat(price),
                },
                &seller,
            )
            .unwrap();
        builder.sign_listing(&mut psbt, &seller).await.unwrap();

        Self {
            seed,
            inscription,
            psbt,
        }
    }

    /// Same inscription, listed again at `price`.
    pub async fn relist(&self, price: u64) -> Self {
        Self::signed(self.seed, self.inscription.clone(), price).await
    }

    pub fn outpoint(&self) -> OutPoint {
        self.inscription.utxo.outpoint()
    }

    pub fn inscription_id(&self) -> InscriptionId {
        InscriptionId::from_outpoint(self.outpoint())
    }

    pub fn encoded(&self) -> String {
        encode_psbt(&self.psbt, PsbtEncoding::Base64)
    }

    /// What an inscription index reports for the listed inscription.
    pub fn inscription_ref(&self) -> InscriptionRef {
        InscriptionRef {
            inscription_id: self.inscription_id(),
            outpoint: self.outpoint(),
            owner: Some(p2tr_signer(self.seed).address_info().address.to_string()),
            value: Amount::from_sat(self.inscription.utxo.value),
        }
    }
}

/// Sell event carrying `listing`, advertising `price` in its `s` tag.
pub async fn sale_event(listing: &TestListing, price: u64) -> OrderEvent {
    let seller = p2tr_signer(listing.seed);
    let tags = OrderTags {
        network: "testnet".to_string(),
        order_type: OrderType::Sell,
        inscription_id: listing.inscription_id(),
        outpoint: listing.outpoint(),
        price: Amount::from_sat(price),
        exchange: "deezy".to_string(),
    };

    OrderEvent::new_unsigned(
        NOSTR_KIND_INSCRIPTION,
        seller.event_public_key(),
        1_700_000_000 + price,
        tags.into_tags(),
        listing.encoded(),
    )
    .unwrap()
    .sign_with(&seller)
    .await
    .unwrap()
}

/// Chain state kept in memory.
pub struct MockChainOracle {
    utxos: Mutex<Vec<(ScriptBuf, Utxo)>>,
    transactions: Mutex<HashMap<Txid, Transaction>>,
    spent: Mutex<HashSet<OutPoint>>,
    broadcasted: Mutex<Vec<Transaction>>,
    fee_rate: Mutex<f64>,
}

impl Default for MockChainOracle {
    fn default() -> Self {
        Self {
            utxos: Mutex::default(),
            transactions: Mutex::default(),
            spent: Mutex::default(),
            broadcasted: Mutex::default(),
            fee_rate: Mutex::new(2.0),
        }
    }
}

impl MockChainOracle {
    /// Makes `input` an unspent output of its owner.
    pub fn add_funding(&self, input: &FundingInput) {
        let script_pubkey = input.tx_out().unwrap().script_pubkey.clone();
        self.utxos
            .lock()
            .unwrap()
            .push((script_pubkey, input.utxo.clone()));
        self.transactions
            .lock()
            .unwrap()
            .insert(input.previous_tx.txid(), input.previous_tx.clone());
    }

    pub fn mark_spent(&self, outpoint: OutPoint) {
        self.spent.lock().unwrap().insert(outpoint);
    }

    pub fn set_fee_rate(&self, fee_rate: f64) {
        *self.fee_rate.lock().unwrap() = fee_rate;
    }

    pub fn broadcasted(&self) -> Vec<Transaction> {
        self.broadcasted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChainOracle for MockChainOracle {
    async fn address_utxos(&self, address: &Address) -> OrdResult<Vec<Utxo>> {
        let script_pubkey = address.script_pubkey();
        let spent = self.spent.lock().unwrap();
        Ok(self
            .utxos
            .lock()
            .unwrap()
            .iter()
            .filter(|(script, utxo)| *script == script_pubkey && !spent.contains(&utxo.outpoint()))
            .map(|(_, utxo)| utxo.clone())
            .collect())
    }

    async fn is_spent(&self, outpoint: &OutPoint) -> OrdResult<bool> {
        Ok(self.spent.lock().unwrap().contains(outpoint))
    }

    async fn transaction(&self, txid: &Txid) -> OrdResult<Transaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| OrdError::Network(format!("transaction {txid} not found")))
    }

    async fn recommended_fees(&self) -> OrdResult<FeeRates> {
        let rate = *self.fee_rate.lock().unwrap();
        Ok(FeeRates {
            fastest_fee: rate,
            half_hour_fee: rate,
            hour_fee: rate,
            economy_fee: rate,
            minimum_fee: rate,
        })
    }

    async fn broadcast(&self, tx: &Transaction) -> OrdResult<Txid> {
        let mut spent = self.spent.lock().unwrap();
        for input in &tx.input {
            spent.insert(input.previous_output);
        }
        self.broadcasted.lock().unwrap().push(tx.clone());
        Ok(tx.txid())
    }
}

/// Inscription index kept in memory, recording how it is queried.
#[derive(Default)]
pub struct MockArtifactOracle {
    inscriptions: Mutex<HashMap<InscriptionId, InscriptionRef>>,
    inscribed: Mutex<HashSet<OutPoint>>,
    failing_lookups: Mutex<HashSet<InscriptionId>>,
    outpoint_checks_fail: AtomicBool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl MockArtifactOracle {
    /// Inscription sitting at output 0 of its reveal transaction.
    pub fn add_inscription(&self, id: InscriptionId, value: u64) {
        self.insert(InscriptionRef {
            inscription_id: id,
            outpoint: OutPoint {
                txid: id.txid,
                vout: 0,
            },
            owner: None,
            value: Amount::from_sat(value),
        });
    }

    pub fn insert(&self, inscription: InscriptionRef) {
        self.mark_inscribed(inscription.outpoint);
        self.inscriptions
            .lock()
            .unwrap()
            .insert(inscription.inscription_id, inscription);
    }

    pub fn mark_inscribed(&self, outpoint: OutPoint) {
        self.inscribed.lock().unwrap().insert(outpoint);
    }

    pub fn fail_lookup(&self, id: InscriptionId) {
        self.failing_lookups.lock().unwrap().insert(id);
    }

    pub fn fail_outpoint_checks(&self) {
        self.outpoint_checks_fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ArtifactOracle for MockArtifactOracle {
    async fn carries_inscription(&self, outpoint: &OutPoint) -> OrdResult<bool> {
        if self.outpoint_checks_fail.load(Ordering::SeqCst) {
            return Err(OrdError::Network("explorer unavailable".to_string()));
        }
        Ok(self.inscribed.lock().unwrap().contains(outpoint))
    }

    async fn inscription(&self, id: &InscriptionId) -> OrdResult<InscriptionRef> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_lookups.lock().unwrap().contains(id) {
            return Err(OrdError::Network(format!("lookup of {id} failed")));
        }
        self.inscriptions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| OrdError::Network(format!("inscription {id} not found")))
    }
}

/// Relay storing events in memory.
pub struct MockRelay {
    url: String,
    failing: bool,
    events: Mutex<Vec<OrderEvent>>,
}

impl MockRelay {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            failing: false,
            events: Mutex::default(),
        }
    }

    /// Relay refusing every operation.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_events(self, events: Vec<OrderEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    pub fn stored(&self) -> Vec<OrderEvent> {
        self.events.lock().unwrap().clone()
    }

    fn check_available(&self) -> OrdResult<()> {
        if self.failing {
            return Err(OrdError::Network(format!("{} is down", self.url)));
        }
        Ok(())
    }

    fn matching(&self, filter: &Filter) -> Vec<OrderEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| filter.matches(event))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl RelayConnection for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, event: &OrderEvent) -> OrdResult<()> {
        self.check_available()?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list(&self, filter: &Filter) -> OrdResult<Vec<OrderEvent>> {
        self.check_available()?;
        Ok(self.matching(filter))
    }

    async fn subscribe(&self, filter: &Filter) -> OrdResult<mpsc::Receiver<RelayMessage>> {
        self.check_available()?;
        let (tx, rx) = mpsc::channel(crate::orderbook::relay::SUBSCRIPTION_BUFFER);
        for event in self.matching(filter) {
            tx.send(RelayMessage::Event(event)).await.unwrap();
        }
        tx.send(RelayMessage::EndOfStoredEvents).await.unwrap();
        // stays open like a live relay
        tokio::spawn(async move { tx.closed().await });

        Ok(rx)
    }
}
