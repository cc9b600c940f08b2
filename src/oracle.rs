//! Chain and artifact state providers.

pub mod esplora;
pub mod explorer;

use bitcoin::{Address, OutPoint, Transaction, Txid};
pub use esplora::EsploraClient;
pub use explorer::OrdExplorerClient;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::FeeLevel;
use crate::inscription::{InscriptionId, InscriptionRef};
use crate::wallet::Utxo;
use crate::{OrdError, OrdResult};

/// Recommended fee rates in sat/vB, as served by `/v1/fees/recommended`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRates {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
    pub economy_fee: f64,
    pub minimum_fee: f64,
}

impl FeeRates {
    pub fn select(&self, level: FeeLevel) -> f64 {
        match level {
            FeeLevel::FastestFee => self.fastest_fee,
            FeeLevel::HalfHourFee => self.half_hour_fee,
            FeeLevel::HourFee => self.hour_fee,
            FeeLevel::EconomyFee => self.economy_fee,
            FeeLevel::MinimumFee => self.minimum_fee,
        }
    }
}

/// Read access to the chain, plus broadcasting.
#[async_trait::async_trait]
pub trait ChainOracle: Send + Sync {
    async fn address_utxos(&self, address: &Address) -> OrdResult<Vec<Utxo>>;

    async fn is_spent(&self, outpoint: &OutPoint) -> OrdResult<bool>;

    async fn transaction(&self, txid: &Txid) -> OrdResult<Transaction>;

    async fn recommended_fees(&self) -> OrdResult<FeeRates>;

    /// Broadcasts `tx` and returns its id.
    async fn broadcast(&self, tx: &Transaction) -> OrdResult<Txid>;
}

/// Knows which outputs carry inscriptions.
#[async_trait::async_trait]
pub trait ArtifactOracle: Send + Sync {
    async fn carries_inscription(&self, outpoint: &OutPoint) -> OrdResult<bool>;

    async fn inscription(&self, id: &InscriptionId) -> OrdResult<InscriptionRef>;
}

/// Outcome of a batched inscription lookup.
#[derive(Debug, Default)]
pub struct BatchResolution {
    pub resolved: Vec<InscriptionRef>,
    pub failed: Vec<(InscriptionId, OrdError)>,
}

/// Resolves the current outpoint of each inscription.
///
/// Lookups run concurrently, at most `batch_size` at a time. A batch is waited for as
/// a whole before the next one starts; a failed lookup is reported without affecting
/// the others.
pub async fn resolve_outpoints(
    oracle: &dyn ArtifactOracle,
    ids: &[InscriptionId],
    batch_size: usize,
) -> BatchResolution {
    let mut resolution = BatchResolution::default();

    for batch in ids.chunks(batch_size.max(1)) {
        let results = join_all(batch.iter().map(|id| oracle.inscription(id))).await;

        for (id, result) in batch.iter().zip(results) {
            match result {
                Ok(inscription) => resolution.resolved.push(inscription),
                Err(err) => {
                    debug!("failed to resolve inscription {id}: {err}");
                    resolution.failed.push((*id, err));
                }
            }
        }
    }

    resolution
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::utils::test_utils::{inscription_id, MockArtifactOracle};

    #[test]
    fn test_should_select_fee_level() {
        let rates: FeeRates = serde_json::from_str(
            r#"{"fastestFee":40,"halfHourFee":30,"hourFee":20,"economyFee":10,"minimumFee":5}"#,
        )
        .unwrap();
        assert_eq!(rates.select(FeeLevel::FastestFee), 40.0);
        assert_eq!(rates.select(FeeLevel::HourFee), 20.0);
        assert_eq!(rates.select(FeeLevel::MinimumFee), 5.0);
    }

    #[tokio::test]
    async fn test_should_resolve_in_bounded_batches() {
        let ids: Vec<InscriptionId> = (0..40).map(inscription_id).collect();
        let oracle = MockArtifactOracle::default();
        for id in &ids {
            oracle.add_inscription(*id, 10_000);
        }
        for id in [&ids[3], &ids[17], &ids[38]] {
            oracle.fail_lookup(*id);
        }

        let resolution = resolve_outpoints(&oracle, &ids, 15).await;

        assert_eq!(resolution.resolved.len(), 37);
        assert_eq!(resolution.failed.len(), 3);
        assert!(resolution.failed.iter().any(|(id, _)| *id == ids[17]));
        assert!(oracle.max_in_flight.load(Ordering::SeqCst) <= 15);
        assert_eq!(oracle.lookups.load(Ordering::SeqCst), 40);
    }
}
