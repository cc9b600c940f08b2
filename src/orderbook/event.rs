//! Order events, as NIP-01 events.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::secp256k1::schnorr;
use bitcoin::{Amount, OutPoint, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::inscription::InscriptionId;
use crate::utils::sha256sum;
use crate::wallet::signer::{verify_schnorr, Signer};
use crate::{OrdError, OrdResult};

pub const TAG_NETWORK: &str = "n";
pub const TAG_TYPE: &str = "t";
pub const TAG_INSCRIPTION: &str = "i";
pub const TAG_OUTPOINT: &str = "u";
pub const TAG_PRICE: &str = "s";
pub const TAG_EXCHANGE: &str = "x";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Sell,
    Buy,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::Buy => "buy",
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = OrdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sell" => Ok(Self::Sell),
            "buy" => Ok(Self::Buy),
            other => Err(OrdError::InvalidOrder(format!("unknown order type: {other}"))),
        }
    }
}

/// Tags of an order event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTags {
    /// `mainnet` or `testnet`
    pub network: String,
    pub order_type: OrderType,
    pub inscription_id: InscriptionId,
    pub outpoint: OutPoint,
    pub price: Amount,
    pub exchange: String,
}

impl OrderTags {
    pub fn into_tags(self) -> Vec<Vec<String>> {
        vec![
            vec![TAG_NETWORK.to_string(), self.network],
            vec![TAG_TYPE.to_string(), self.order_type.to_string()],
            vec![TAG_INSCRIPTION.to_string(), self.inscription_id.to_string()],
            vec![TAG_OUTPOINT.to_string(), self.outpoint.to_string()],
            vec![TAG_PRICE.to_string(), self.price.to_sat().to_string()],
            vec![TAG_EXCHANGE.to_string(), self.exchange],
        ]
    }
}

/// A NIP-01 event carrying an order.
///
/// `id` is the sha256 of the serialized `[0, pubkey, created_at, kind, tags, content]`
/// array, `sig` the BIP-340 signature of `id` by `pubkey`. Both hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl OrderEvent {
    /// Event with its id set and no signature.
    pub fn new_unsigned(
        kind: u16,
        pubkey: XOnlyPublicKey,
        created_at: u64,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> OrdResult<Self> {
        let mut event = Self {
            id: String::new(),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        };
        event.id = hex::encode(event.compute_id()?);

        Ok(event)
    }

    pub fn compute_id(&self) -> OrdResult<[u8; 32]> {
        let serialized = serde_json::to_string(&(
            0,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))?;

        Ok(sha256sum(serialized.as_bytes()))
    }

    /// Sets the pubkey of `signer`, then the id and the signature.
    pub async fn sign_with(mut self, signer: &dyn Signer) -> OrdResult<Self> {
        self.pubkey = signer.event_public_key().to_string();
        let id = self.compute_id()?;
        let sig = signer.sign_event(id).await?;
        self.id = hex::encode(id);
        self.sig = sig.to_string();

        Ok(self)
    }

    /// Checks the id and the signature of the event.
    pub fn verify(&self) -> OrdResult<()> {
        let id = self.compute_id()?;
        if hex::encode(id) != self.id {
            debug!("event {} has a mismatching id", self.id);
            return Err(OrdError::SignatureInvalid);
        }
        let pubkey =
            XOnlyPublicKey::from_str(&self.pubkey).map_err(|_| OrdError::SignatureInvalid)?;
        let sig = schnorr::Signature::from_str(&self.sig).map_err(|_| OrdError::SignatureInvalid)?;

        verify_schnorr(id, &sig, &pubkey)
    }

    /// Value of the first tag named `name`.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    pub fn order_type(&self) -> OrdResult<OrderType> {
        self.required_tag(TAG_TYPE)?.parse()
    }

    pub fn inscription_id(&self) -> OrdResult<InscriptionId> {
        self.required_tag(TAG_INSCRIPTION)?
            .parse()
            .map_err(|e| OrdError::InvalidOrder(format!("invalid inscription id: {e}")))
    }

    pub fn outpoint(&self) -> OrdResult<OutPoint> {
        self.required_tag(TAG_OUTPOINT)?
            .parse()
            .map_err(|e| OrdError::InvalidOrder(format!("invalid outpoint: {e}")))
    }

    /// Price advertised in the `s` tag, if numeric.
    pub fn advertised_price(&self) -> Option<Amount> {
        self.tag(TAG_PRICE)?.parse().ok().map(Amount::from_sat)
    }

    fn required_tag(&self, name: &str) -> OrdResult<&str> {
        self.tag(name)
            .ok_or_else(|| OrdError::InvalidOrder(format!("missing '{name}' tag")))
    }
}
