//! # ord-market
//!
//! Escrow-free marketplace for Ordinal inscriptions.
//!
//! Sellers publish a `SIGHASH_SINGLE|ANYONECANPAY` signed PSBT as a Nostr event; buyers
//! pick it up from the relays, extend it with their own funding and broadcast the
//! transaction. The artifact and the payment move in the same transaction, so no
//! escrow is involved. Dutch auctions and bids are built on the same primitives.
//!
//! ## Example
//!
//! ```rust
//! use ord_market::utils::fees::calculate_fee;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fee = calculate_fee(2, 3, 10.0, 1)?;
//!     assert_eq!(fee.to_sat(), 2_970);
//!     Ok(())
//! }
//! ```
//!

#[macro_use]
extern crate log;

pub mod auction;
pub mod config;
mod error;
pub mod inscription;
pub mod oracle;
pub mod orderbook;
mod result;
pub mod session;
pub mod utils;
pub mod wallet;

pub use auction::{AuctionSchedule, AuctionState, AuctionStatus, AuctionTier, DutchAuction};
pub use config::{FeeLevel, MarketConfig};
pub use error::{InscriptionParseError, OrdError, Shortfall};
pub use inscription::{InscriptionId, InscriptionRef};
pub use oracle::{ArtifactOracle, ChainOracle, FeeRates};
pub use orderbook::{BidOrder, Order, OrderBook, OrderEvent, OrderType, SaleOrder};
pub use result::OrdResult;
pub use session::{MarketSession, PreparedAuction};
pub use wallet::{
    CoinSelection, FundingInput, LocalSigner, MarketTransactionBuilder, Signer, Utxo, UtxoStatus,
};
