use std::collections::HashSet;

use bitcoin::{Amount, OutPoint};

use super::Utxo;
use crate::error::Shortfall;
use crate::oracle::ArtifactOracle;
use crate::utils::constants::MIN_OUTPUT_VALUE;
use crate::utils::fees::calculate_fee;
use crate::{OrdError, OrdResult};

/// Parameters of a coin selection.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub utxos: Vec<Utxo>,
    /// Amount to cover, fee excluded.
    pub amount: Amount,
    /// Inputs the transaction already has.
    pub vins: usize,
    pub vouts: usize,
    pub fee_rate: f64,
    /// Outputs below this value are not considered.
    pub min_value: u64,
    /// Outputs that must not be selected, e.g. the dummy ones.
    pub exclude: HashSet<OutPoint>,
}

impl SelectionRequest {
    pub fn new(utxos: Vec<Utxo>, amount: Amount, vins: usize, vouts: usize, fee_rate: f64) -> Self {
        Self {
            utxos,
            amount,
            vins,
            vouts,
            fee_rate,
            min_value: MIN_OUTPUT_VALUE,
            exclude: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinSelection {
    pub selected_utxos: Vec<Utxo>,
    pub total_value: Amount,
}

/// Greedily selects the largest confirmed outputs until `amount` plus the fee of the
/// resulting transaction is covered.
///
/// Outputs carrying an inscription are never selected; if the oracle can't tell, the
/// selection fails.
pub async fn select_utxos(
    request: SelectionRequest,
    artifacts: &dyn ArtifactOracle,
) -> OrdResult<CoinSelection> {
    // fails on invalid fee rates before querying the oracle
    calculate_fee(request.vins, request.vouts, request.fee_rate, 1)?;

    let mut candidates: Vec<Utxo> = request
        .utxos
        .into_iter()
        .filter(|utxo| {
            utxo.status.confirmed
                && utxo.value >= request.min_value
                && !request.exclude.contains(&utxo.outpoint())
        })
        .collect();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected_utxos = Vec::new();
    let mut total_value = Amount::ZERO;
    let mut needed = request.amount;

    for utxo in candidates {
        if artifacts.carries_inscription(&utxo.outpoint()).await? {
            debug!("skipping {}: carries an inscription", utxo.outpoint());
            continue;
        }

        total_value = total_value
            .checked_add(Amount::from_sat(utxo.value))
            .unwrap_or(Amount::MAX);
        selected_utxos.push(utxo);

        let fee = calculate_fee(
            request.vins + selected_utxos.len(),
            request.vouts,
            request.fee_rate,
            1,
        )?;
        needed = request.amount.checked_add(fee).ok_or_else(|| {
            OrdError::InsufficientFunds(Shortfall::new(
                request.amount,
                fee,
                total_value,
                Amount::MAX,
            ))
        })?;
        if total_value >= needed {
            debug!(
                "selected {} utxos worth {total_value} for {needed}",
                selected_utxos.len()
            );
            return Ok(CoinSelection {
                selected_utxos,
                total_value,
            });
        }
    }

    let fee = needed.checked_sub(request.amount).unwrap_or(Amount::ZERO);
    Err(OrdError::InsufficientFunds(Shortfall::new(
        request.amount,
        fee,
        total_value,
        needed,
    )))
}
