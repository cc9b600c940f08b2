pub mod builder;
pub mod coin_selection;
pub mod psbt;
pub mod signer;

use bitcoin::{BlockHash, OutPoint, Transaction, TxOut, Txid};
pub use builder::{BidArgs, BuyArgs, ListingArgs, MarketTransactionBuilder, SendArgs};
pub use coin_selection::{select_utxos, CoinSelection, SelectionRequest};
pub use psbt::{decode_psbt, encode_psbt, extract_tx, validate_partial_tx, PsbtEncoding};
use serde::{Deserialize, Serialize};
pub use signer::{
    AddressInfo, ExternalSigner, InputForm, InputSignature, LocalSigner, SigScheme, SignRequest,
    Signer, SigningBackend,
};

use crate::{OrdError, OrdResult};

/// A wallet output, as reported by an Esplora `/address/:address/utxo` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    /// Value in sats.
    pub value: u64,
    pub status: UtxoStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoStatus {
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<BlockHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

impl UtxoStatus {
    pub fn confirmed(block_height: u32) -> Self {
        Self {
            confirmed: true,
            block_height: Some(block_height),
            ..Default::default()
        }
    }

    pub fn unconfirmed() -> Self {
        Self::default()
    }
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// A wallet output along with the transaction that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingInput {
    pub utxo: Utxo,
    pub previous_tx: Transaction,
}

impl FundingInput {
    /// Pairs `utxo` with its parent transaction, checking they match.
    pub fn new(utxo: Utxo, previous_tx: Transaction) -> OrdResult<Self> {
        if previous_tx.txid() != utxo.txid {
            return Err(OrdError::InvalidOrder(format!(
                "transaction {} is not the parent of {}",
                previous_tx.txid(),
                utxo.outpoint()
            )));
        }
        if previous_tx.output.len() <= utxo.vout as usize {
            return Err(OrdError::InputNotFound(utxo.vout as usize));
        }

        Ok(Self { utxo, previous_tx })
    }

    /// The output being spent.
    pub fn tx_out(&self) -> OrdResult<&TxOut> {
        self.previous_tx
            .output
            .get(self.utxo.vout as usize)
            .ok_or(OrdError::InputNotFound(self.utxo.vout as usize))
    }
}
