use bitcoin::{Amount, OutPoint};
use thiserror::Error;

/// Breakdown of a funding shortfall.
///
/// `needed` is everything the transaction has to pay for (price, fee and any reserved
/// value); `missing` is always `needed - have`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub price: Amount,
    pub fee: Amount,
    pub have: Amount,
    pub needed: Amount,
    pub missing: Amount,
}

impl Shortfall {
    pub fn new(price: Amount, fee: Amount, have: Amount, needed: Amount) -> Self {
        Self {
            price,
            fee,
            have,
            needed,
            missing: needed.checked_sub(have).unwrap_or(Amount::ZERO),
        }
    }
}

impl std::fmt::Display for Shortfall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "price {} sats, fee {} sats, have {} sats, needed {} sats, missing {} sats",
            self.price.to_sat(),
            self.fee.to_sat(),
            self.have.to_sat(),
            self.needed.to_sat(),
            self.missing.to_sat()
        )
    }
}

#[derive(Error, Debug)]
pub enum OrdError {
    #[error("invalid fee rate: {0}")]
    InvalidFeeRate(f64),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(Shortfall),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("order is stale, outpoint {0} already spent")]
    StaleOrder(OutPoint),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("network error: {0}")]
    Network(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("psbt error: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),
    #[error("psbt encoding error: {0}")]
    PsbtEncoding(#[from] bitcoin::psbt::PsbtParseError),
    #[error("sighash error: {0}")]
    Sighash(#[from] bitcoin::sighash::Error),
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] bitcoin::secp256k1::Error),
    #[error("address error: {0}")]
    Address(#[from] bitcoin::address::Error),
    #[error("address parse error: {0}")]
    AddressParse(#[from] bitcoin::address::ParseError),
    #[error("consensus encoding error: {0}")]
    Encoding(#[from] bitcoin::consensus::encode::Error),
    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("inscription id error: {0}")]
    InscriptionParser(#[from] InscriptionParseError),
    #[error("input {0} not found")]
    InputNotFound(usize),
    #[error("psbt input {0} is not finalized")]
    NotFinalized(usize),
    #[error("outputs are spending more than inputs")]
    OutputsExceedInputs,
    #[error("two confirmed dummy utxos are required")]
    MissingDummyUtxo,
    #[error("unsupported script type")]
    InvalidScriptType,
    #[error("unexpected signature type")]
    UnexpectedSignature,
}

impl From<reqwest::Error> for OrdError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for OrdError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Errors raised while parsing an inscription id.
#[derive(Error, Debug)]
pub enum InscriptionParseError {
    #[error("invalid character: '{0}'")]
    Character(char),
    #[error("invalid length: {0}")]
    Length(usize),
    #[error("invalid separator: '{0}'")]
    Separator(char),
    #[error("invalid txid: {0}")]
    Txid(String),
    #[error("invalid index: {0}")]
    Index(std::num::ParseIntError),
}
