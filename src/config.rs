//! Marketplace configuration.
//!
//! Every field has a default, so a JSON document only needs to carry the overrides:
//!
//! ```rust
//! use ord_market::MarketConfig;
//!
//! let config = MarketConfig::from_json_str(r#"{ "fee_level": "fastestFee" }"#).unwrap();
//! assert_eq!(config.nostr_kind, 802);
//! ```

use std::path::Path;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::utils::constants::{
    ARTIFACT_OUTPUT_VALUE, ASSUMED_TX_BYTES, DEFAULT_EXCHANGE_TAG, DUMMY_UTXO_VALUE,
    MIN_OUTPUT_VALUE, NOSTR_KIND_INSCRIPTION, OUTPOINT_BATCH_SIZE,
};
use crate::{OrdError, OrdResult};

/// Named tier of the recommended fee-rate oracle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeLevel {
    FastestFee,
    HalfHourFee,
    #[default]
    HourFee,
    EconomyFee,
    MinimumFee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub network: Network,
    /// Nostr relays used as the order book.
    pub relays: Vec<String>,
    /// Event kind used for marketplace orders.
    pub nostr_kind: u16,
    /// Value of the `x` tag on published orders.
    pub exchange_tag: String,
    /// Esplora compatible REST endpoint, without trailing slash.
    pub esplora_url: String,
    /// `ord` explorer endpoint, without trailing slash.
    pub explorer_url: String,
    /// Endpoint resolving inscription ids to their current outpoint.
    pub outpoint_api_url: String,
    pub fee_level: FeeLevel,
    pub assumed_tx_bytes: u64,
    pub dummy_utxo_value: u64,
    /// Outputs below this value are never used as funding.
    pub min_output_value: u64,
    /// Value given to the artifact output of a bid.
    pub artifact_output_value: u64,
    /// Verify seller signatures when validating orders.
    pub verify_signatures: bool,
    pub outpoint_batch_size: usize,
    pub order_limit: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            relays: vec![
                "wss://nostr.openordex.org".to_string(),
                "wss://relay.damus.io".to_string(),
            ],
            nostr_kind: NOSTR_KIND_INSCRIPTION,
            exchange_tag: DEFAULT_EXCHANGE_TAG.to_string(),
            esplora_url: "https://mempool.space/api".to_string(),
            explorer_url: "https://ordinals.com".to_string(),
            outpoint_api_url: "https://turbo.ordinalswallet.com".to_string(),
            fee_level: FeeLevel::default(),
            assumed_tx_bytes: ASSUMED_TX_BYTES,
            dummy_utxo_value: DUMMY_UTXO_VALUE,
            min_output_value: MIN_OUTPUT_VALUE,
            artifact_output_value: ARTIFACT_OUTPUT_VALUE,
            verify_signatures: true,
            outpoint_batch_size: OUTPOINT_BATCH_SIZE,
            order_limit: 10,
        }
    }
}

impl MarketConfig {
    /// Defaults for the given network, with the public testnet endpoints when not on mainnet.
    pub fn for_network(network: Network) -> Self {
        let mut config = Self {
            network,
            ..Default::default()
        };
        match network {
            Network::Bitcoin => {}
            Network::Signet => {
                config.esplora_url = "https://mempool.space/signet/api".to_string();
                config.explorer_url = "https://explorer-signet.openordex.org".to_string();
            }
            _ => {
                config.esplora_url = "https://mempool.space/testnet/api".to_string();
                config.explorer_url = "https://testnet.ordinals.com".to_string();
            }
        }
        config
    }

    pub fn from_json_str(json: &str) -> OrdResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> OrdResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| OrdError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> OrdResult<()> {
        if self.relays.is_empty() {
            return Err(OrdError::Config("no relays configured".to_string()));
        }
        if let Some(relay) = self
            .relays
            .iter()
            .find(|r| !(r.starts_with("wss://") || r.starts_with("ws://")))
        {
            return Err(OrdError::Config(format!("invalid relay url: {relay}")));
        }
        if self.outpoint_batch_size == 0 {
            return Err(OrdError::Config("outpoint batch size must be > 0".to_string()));
        }
        if self.dummy_utxo_value >= self.min_output_value {
            return Err(OrdError::Config(
                "dummy utxo value must be below the minimum funding output value".to_string(),
            ));
        }

        Ok(())
    }

    /// Value of the `n` tag for the configured network.
    pub fn network_name(&self) -> &'static str {
        match self.network {
            Network::Bitcoin => "mainnet",
            _ => "testnet",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_should_fill_defaults_for_missing_fields() {
        let config = MarketConfig::from_json_str(
            r#"{ "network": "testnet", "relays": ["wss://relay.example"], "fee_level": "economyFee" }"#,
        )
        .unwrap();

        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.relays, vec!["wss://relay.example".to_string()]);
        assert_eq!(config.fee_level, FeeLevel::EconomyFee);
        assert_eq!(config.nostr_kind, NOSTR_KIND_INSCRIPTION);
        assert_eq!(config.outpoint_batch_size, 15);
        assert_eq!(config.network_name(), "testnet");
    }

    #[test]
    fn test_should_reject_bad_relay_urls() {
        let err = MarketConfig::from_json_str(r#"{ "relays": ["https://relay.example"] }"#)
            .unwrap_err();
        assert!(matches!(err, OrdError::Config(_)));

        let err = MarketConfig::from_json_str(r#"{ "relays": [] }"#).unwrap_err();
        assert!(matches!(err, OrdError::Config(_)));
    }

    #[test]
    fn test_should_pick_network_endpoints() {
        let config = MarketConfig::for_network(Network::Signet);
        assert!(config.esplora_url.contains("signet"));
        assert_eq!(MarketConfig::default().network_name(), "mainnet");
    }
}
