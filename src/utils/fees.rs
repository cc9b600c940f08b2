use bitcoin::Amount;

use super::constants::{BASE_TX_VBYTES, INPUT_VBYTES, OUTPUT_VBYTES};
use crate::error::Shortfall;
use crate::wallet::Utxo;
use crate::{OrdError, OrdResult};

fn check_fee_rate(fee_rate: f64) -> OrdResult<()> {
    if fee_rate.is_finite() && fee_rate > 0.0 {
        Ok(())
    } else {
        Err(OrdError::InvalidFeeRate(fee_rate))
    }
}

/// Fee in sats of a transaction spending `vins` key-path inputs into `vouts` outputs,
/// plus `include_change_output` change outputs.
pub fn calculate_fee(
    vins: usize,
    vouts: usize,
    fee_rate: f64,
    include_change_output: usize,
) -> OrdResult<Amount> {
    check_fee_rate(fee_rate)?;

    let vbytes = BASE_TX_VBYTES
        + vins as f64 * INPUT_VBYTES
        + vouts as f64 * OUTPUT_VBYTES
        + include_change_output as f64 * OUTPUT_VBYTES;

    Ok(Amount::from_sat((vbytes * fee_rate).round() as u64))
}

/// Sum of `amounts`, `None` when it overflows.
pub fn checked_sum(amounts: impl IntoIterator<Item = Amount>) -> Option<Amount> {
    amounts.into_iter().try_fold(Amount::ZERO, Amount::checked_add)
}

/// Shortfall for `needed`; an overflowing requirement can never be met.
fn insufficient(price: Amount, fee: Amount, have: Amount, needed: Option<Amount>) -> OrdError {
    OrdError::InsufficientFunds(Shortfall::new(
        price,
        fee,
        have,
        needed.unwrap_or(Amount::MAX),
    ))
}

/// Fee of the assumed single-input send at `fee_rate`.
fn assumed_send_fee(fee_rate: f64, assumed_tx_bytes: u64) -> OrdResult<u64> {
    check_fee_rate(fee_rate)?;
    Ok((fee_rate * assumed_tx_bytes as f64).round() as u64)
}

/// Value that can be sent out of `utxo`.
///
/// An explicit price always wins, zero included; otherwise the utxo value minus the fee of
/// the assumed transaction, floored at zero.
pub fn output_value(
    utxo: &Utxo,
    fee_rate: f64,
    explicit_price: Option<Amount>,
    assumed_tx_bytes: u64,
) -> OrdResult<Amount> {
    if let Some(price) = explicit_price {
        return Ok(price);
    }

    let fee = assumed_send_fee(fee_rate, assumed_tx_bytes)?;
    Ok(Amount::from_sat(utxo.value.saturating_sub(fee)))
}

/// Value left in `utxo_value` after sending `sending_amount` out of it.
pub fn partial_output_value(
    utxo_value: Amount,
    fee_rate: f64,
    sending_amount: Amount,
    assumed_tx_bytes: u64,
) -> OrdResult<Amount> {
    let fee = Amount::from_sat(assumed_send_fee(fee_rate, assumed_tx_bytes)?);
    let needed = sending_amount.checked_add(fee);

    needed
        .and_then(|needed| utxo_value.checked_sub(needed))
        .ok_or_else(|| insufficient(sending_amount, fee, utxo_value, needed))
}

/// Change of a buy-match transaction.
pub fn buy_change(
    total_funding: Amount,
    total_dummy: Amount,
    price: Amount,
    fee: Amount,
) -> OrdResult<Amount> {
    let needed = checked_sum([price, fee, total_dummy]);

    needed
        .and_then(|needed| total_funding.checked_sub(needed))
        .ok_or_else(|| {
            debug!("buy underfunded: have {total_funding}, need {needed:?}");
            insufficient(price, fee, total_funding, needed)
        })
}

/// Change of a bid transaction.
///
/// The artifact value flows into the bid as well, while the bidder pays for the artifact
/// output on top of the bid price.
pub fn bid_change(
    utxo_price: Amount,
    total_funding: Amount,
    bid_price: Amount,
    fee: Amount,
    artifact_output_value: Amount,
) -> OrdResult<Amount> {
    let have = utxo_price
        .checked_add(total_funding)
        .ok_or_else(|| OrdError::InvalidOrder("bid input value overflows".to_string()))?;
    let needed = checked_sum([bid_price, fee, artifact_output_value]);

    needed
        .and_then(|needed| have.checked_sub(needed))
        .ok_or_else(|| {
            debug!("bid underfunded: have {have}, need {needed:?}");
            insufficient(bid_price, fee, have, needed)
        })
}

pub fn sat_to_btc(amount: Amount) -> f64 {
    amount.to_btc()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::wallet::UtxoStatus;

    fn utxo(value: u64) -> Utxo {
        Utxo {
            txid: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
                .parse()
                .unwrap(),
            vout: 0,
            value,
            status: UtxoStatus::confirmed(800_000),
        }
    }

    #[test]
    fn test_should_calculate_fee() {
        assert_eq!(calculate_fee(2, 3, 10.0, 1).unwrap(), Amount::from_sat(2_970));
        // 10 + 57.5 + 43 = 110.5 rounds up
        assert_eq!(calculate_fee(1, 1, 1.0, 0).unwrap(), Amount::from_sat(111));
        assert_eq!(calculate_fee(0, 0, 1.0, 0).unwrap(), Amount::from_sat(10));
    }

    #[test]
    fn test_should_reject_invalid_fee_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                calculate_fee(1, 1, rate, 1),
                Err(OrdError::InvalidFeeRate(_))
            ));
        }
    }

    #[test]
    fn test_should_honor_explicit_zero_price() {
        let utxo = utxo(50_000);
        assert_eq!(
            output_value(&utxo, 5.0, Some(Amount::ZERO), 111).unwrap(),
            Amount::ZERO
        );
        assert_eq!(
            output_value(&utxo, 5.0, None, 111).unwrap(),
            Amount::from_sat(50_000 - 555)
        );
        assert_eq!(
            output_value(&self::utxo(100), 5.0, None, 111).unwrap(),
            Amount::ZERO
        );
    }

    #[test]
    fn test_should_compute_partial_output_value() {
        assert_eq!(
            partial_output_value(
                Amount::from_sat(50_000),
                2.0,
                Amount::from_sat(20_000),
                100
            )
            .unwrap(),
            Amount::from_sat(29_800)
        );
        assert!(matches!(
            partial_output_value(Amount::from_sat(1_000), 2.0, Amount::from_sat(20_000), 100),
            Err(OrdError::InsufficientFunds(_))
        ));
    }

    #[test]
    fn test_should_compute_buy_change() {
        let change = buy_change(
            Amount::from_sat(50_000),
            Amount::from_sat(1_200),
            Amount::from_sat(30_000),
            Amount::from_sat(1_500),
        )
        .unwrap();
        assert_eq!(change, Amount::from_sat(17_300));
    }

    #[test]
    fn test_should_report_buy_shortfall() {
        let err = buy_change(
            Amount::from_sat(20_000),
            Amount::from_sat(1_200),
            Amount::from_sat(30_000),
            Amount::from_sat(1_500),
        )
        .unwrap_err();

        let OrdError::InsufficientFunds(shortfall) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(shortfall.price, Amount::from_sat(30_000));
        assert_eq!(shortfall.fee, Amount::from_sat(1_500));
        assert_eq!(shortfall.have, Amount::from_sat(20_000));
        assert_eq!(shortfall.needed, Amount::from_sat(32_700));
        assert_eq!(shortfall.missing, Amount::from_sat(12_700));
    }

    #[test]
    fn test_should_compute_bid_change() {
        let change = bid_change(
            Amount::from_sat(10_000),
            Amount::from_sat(60_000),
            Amount::from_sat(40_000),
            Amount::from_sat(2_000),
            Amount::from_sat(10_000),
        )
        .unwrap();
        assert_eq!(change, Amount::from_sat(18_000));

        assert!(bid_change(
            Amount::from_sat(10_000),
            Amount::from_sat(30_000),
            Amount::from_sat(40_000),
            Amount::from_sat(2_000),
            Amount::from_sat(10_000),
        )
        .is_err());
    }

    #[test]
    fn test_should_report_overflowing_requirements_as_shortfall() {
        let price = Amount::from_sat(u64::MAX - 10);
        let err = buy_change(
            Amount::from_sat(100_000),
            Amount::from_sat(1_200),
            price,
            Amount::from_sat(1_500),
        )
        .unwrap_err();
        let OrdError::InsufficientFunds(shortfall) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(shortfall.price, price);
        assert_eq!(shortfall.needed, Amount::MAX);

        assert!(matches!(
            bid_change(
                Amount::from_sat(10_000),
                Amount::from_sat(60_000),
                price,
                Amount::from_sat(2_000),
                Amount::from_sat(10_000),
            ),
            Err(OrdError::InsufficientFunds(_))
        ));
        assert!(matches!(
            partial_output_value(Amount::from_sat(50_000), 2.0, Amount::MAX, 100),
            Err(OrdError::InsufficientFunds(_))
        ));
        assert_eq!(checked_sum([Amount::MAX, Amount::from_sat(1)]), None);
        assert_eq!(
            checked_sum([Amount::from_sat(1), Amount::from_sat(2)]),
            Some(Amount::from_sat(3))
        );
    }

    #[test]
    fn test_should_convert_sats_to_btc() {
        assert_eq!(sat_to_btc(Amount::from_sat(150_000_000)), 1.5);
    }

    proptest! {
        #[test]
        fn fee_is_monotonic(
            vins in 0usize..50,
            vouts in 0usize..50,
            change in 0usize..2,
            rate in 0.1f64..500.0,
        ) {
            let fee = calculate_fee(vins, vouts, rate, change).unwrap();
            prop_assert!(calculate_fee(vins + 1, vouts, rate, change).unwrap() >= fee);
            prop_assert!(calculate_fee(vins, vouts + 1, rate, change).unwrap() >= fee);
            prop_assert!(calculate_fee(vins, vouts, rate, change + 1).unwrap() >= fee);
            prop_assert!(calculate_fee(vins, vouts, rate * 1.5, change).unwrap() >= fee);
        }
    }
}
