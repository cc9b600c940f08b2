//! PSBT codec, signing, finalization and validation helpers.

use std::str::FromStr as _;

use bitcoin::hashes::Hash as _;
use bitcoin::psbt::{Input, Psbt, PsbtSighashType};
use bitcoin::sighash::{Prevouts, SighashCache};
use bitcoin::{
    Address, Amount, EcdsaSighashType, Network, OutPoint, PublicKey, ScriptBuf, TapSighashType,
    Transaction, TxOut, Witness, XOnlyPublicKey,
};

use super::signer::{verify_ecdsa, verify_schnorr, InputSignature, SigScheme, SignRequest, Signer};
use crate::utils::fees::checked_sum;
use crate::{OrdError, OrdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsbtEncoding {
    Hex,
    Base64,
}

/// Parses a PSBT, detecting the encoding.
///
/// An even length string made of hex digits only is read as hex, anything else as base64.
pub fn decode_psbt(encoded: &str) -> OrdResult<Psbt> {
    let encoded = encoded.trim();
    let is_hex = !encoded.is_empty()
        && encoded.len() % 2 == 0
        && encoded.chars().all(|c| c.is_ascii_hexdigit());

    if is_hex {
        Ok(Psbt::deserialize(&hex::decode(encoded)?)?)
    } else {
        Ok(Psbt::from_str(encoded)?)
    }
}

pub fn encode_psbt(psbt: &Psbt, encoding: PsbtEncoding) -> String {
    match encoding {
        PsbtEncoding::Hex => hex::encode(psbt.serialize()),
        PsbtEncoding::Base64 => psbt.to_string(),
    }
}

/// Which parts of the transaction a signature commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SighashScope {
    /// Every input and output. `SIGHASH_DEFAULT` for taproot.
    All,
    /// Only the signed input and the output at the same index.
    SingleAnyoneCanPay,
    /// Only the signed input and every output.
    AllAnyoneCanPay,
}

impl SighashScope {
    fn tap(self) -> TapSighashType {
        match self {
            Self::All => TapSighashType::Default,
            Self::SingleAnyoneCanPay => TapSighashType::SinglePlusAnyoneCanPay,
            Self::AllAnyoneCanPay => TapSighashType::AllPlusAnyoneCanPay,
        }
    }

    fn ecdsa(self) -> EcdsaSighashType {
        match self {
            Self::All => EcdsaSighashType::All,
            Self::SingleAnyoneCanPay => EcdsaSighashType::SinglePlusAnyoneCanPay,
            Self::AllAnyoneCanPay => EcdsaSighashType::AllPlusAnyoneCanPay,
        }
    }

    /// Sighash type to advertise in the PSBT input.
    pub fn psbt_sighash_type(self, scheme: SigScheme) -> PsbtSighashType {
        match scheme {
            SigScheme::Schnorr => self.tap().into(),
            SigScheme::Ecdsa => self.ecdsa().into(),
        }
    }
}

/// Output spent by input `index`, taken from `witness_utxo` or `non_witness_utxo`.
pub fn spent_output(psbt: &Psbt, index: usize) -> OrdResult<TxOut> {
    let input = psbt.inputs.get(index).ok_or(OrdError::InputNotFound(index))?;
    let txin = psbt
        .unsigned_tx
        .input
        .get(index)
        .ok_or(OrdError::InputNotFound(index))?;

    if let Some(txout) = &input.witness_utxo {
        return Ok(txout.clone());
    }

    let previous_tx = input
        .non_witness_utxo
        .as_ref()
        .ok_or(OrdError::InputNotFound(index))?;
    if previous_tx.txid() != txin.previous_output.txid {
        return Err(OrdError::InvalidOrder(format!(
            "non witness utxo of input {index} does not match its outpoint"
        )));
    }
    previous_tx
        .output
        .get(txin.previous_output.vout as usize)
        .cloned()
        .ok_or(OrdError::InputNotFound(index))
}

fn taproot_sighash(
    psbt: &Psbt,
    index: usize,
    hash_ty: TapSighashType,
) -> OrdResult<[u8; 32]> {
    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let sighash = match hash_ty {
        TapSighashType::AllPlusAnyoneCanPay
        | TapSighashType::NonePlusAnyoneCanPay
        | TapSighashType::SinglePlusAnyoneCanPay => {
            let prevout = spent_output(psbt, index)?;
            cache.taproot_key_spend_signature_hash(
                index,
                &Prevouts::One(index, prevout),
                hash_ty,
            )?
        }
        _ => {
            let prevouts = (0..psbt.inputs.len())
                .map(|i| spent_output(psbt, i))
                .collect::<OrdResult<Vec<_>>>()?;
            cache.taproot_key_spend_signature_hash(index, &Prevouts::All(&prevouts), hash_ty)?
        }
    };

    Ok(sighash.to_byte_array())
}

fn p2wpkh_sighash(psbt: &Psbt, index: usize, hash_ty: EcdsaSighashType) -> OrdResult<[u8; 32]> {
    let prevout = spent_output(psbt, index)?;
    if !prevout.script_pubkey.is_p2wpkh() {
        return Err(OrdError::InvalidScriptType);
    }

    let mut cache = SighashCache::new(&psbt.unsigned_tx);
    let sighash =
        cache.p2wpkh_signature_hash(index, &prevout.script_pubkey, prevout.value, hash_ty)?;

    Ok(sighash.to_byte_array())
}

/// Signs input `index` with `signer` and finalizes it.
pub async fn sign_input(
    psbt: &mut Psbt,
    index: usize,
    signer: &dyn Signer,
    scope: SighashScope,
) -> OrdResult<()> {
    let scheme = signer.sig_scheme();
    let sighash = match scheme {
        SigScheme::Schnorr => taproot_sighash(psbt, index, scope.tap())?,
        SigScheme::Ecdsa => p2wpkh_sighash(psbt, index, scope.ecdsa())?,
    };

    let signature = signer.sign(SignRequest { sighash, scheme }).await?;
    let witness = match signature {
        InputSignature::Schnorr(sig) => {
            let sig = bitcoin::taproot::Signature {
                sig,
                hash_ty: scope.tap(),
            };
            Witness::from_slice(&[sig.to_vec()])
        }
        InputSignature::Ecdsa(sig) => {
            let sig = bitcoin::ecdsa::Signature {
                sig,
                hash_ty: scope.ecdsa(),
            };
            Witness::p2wpkh(&sig, &signer.address_info().public_key.inner)
        }
    };
    debug!("input {index} witness: {witness:?}");

    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or(OrdError::InputNotFound(index))?;
    finalize_input(input, witness);

    Ok(())
}

/// Sets the final witness and drops the fields only needed for signing.
fn finalize_input(input: &mut Input, witness: Witness) {
    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.tap_key_sig = None;
    input.tap_script_sigs.clear();
    input.tap_scripts.clear();
    input.tap_key_origins.clear();
    input.tap_internal_key = None;
    input.tap_merkle_root = None;
}

pub fn is_finalized(input: &Input) -> bool {
    input.final_script_witness.is_some() || input.final_script_sig.is_some()
}

/// Extracts the network transaction out of a fully finalized PSBT.
pub fn extract_tx(psbt: &Psbt) -> OrdResult<Transaction> {
    let mut tx = psbt.unsigned_tx.clone();
    let mut input_value = Amount::ZERO;

    for (index, input) in psbt.inputs.iter().enumerate() {
        if !is_finalized(input) {
            return Err(OrdError::NotFinalized(index));
        }
        input_value = input_value
            .checked_add(spent_output(psbt, index)?.value)
            .ok_or_else(|| OrdError::InvalidOrder("input value overflows".to_string()))?;

        let txin = tx.input.get_mut(index).ok_or(OrdError::InputNotFound(index))?;
        txin.witness = input.final_script_witness.clone().unwrap_or_default();
        txin.script_sig = input.final_script_sig.clone().unwrap_or_else(ScriptBuf::new);
    }

    let output_value = checked_sum(tx.output.iter().map(|output| output.value))
        .ok_or_else(|| OrdError::InvalidOrder("output value overflows".to_string()))?;
    if output_value > input_value {
        return Err(OrdError::OutputsExceedInputs);
    }

    Ok(tx)
}

/// Verifies the final signature of input `index`.
///
/// Taproot inputs are checked against the output key of the spent script, other inputs
/// as P2WPKH spends.
pub fn verify_input_signature(psbt: &Psbt, index: usize) -> OrdResult<()> {
    let input = psbt.inputs.get(index).ok_or(OrdError::InputNotFound(index))?;
    let prevout = spent_output(psbt, index)?;
    let witness = input
        .final_script_witness
        .as_ref()
        .ok_or(OrdError::NotFinalized(index))?;

    if input.tap_internal_key.is_some() || prevout.script_pubkey.is_p2tr() {
        if !prevout.script_pubkey.is_p2tr() || witness.len() != 1 {
            return Err(OrdError::SignatureInvalid);
        }
        let raw = witness.nth(0).ok_or(OrdError::SignatureInvalid)?;
        let sig = bitcoin::taproot::Signature::from_slice(raw)
            .map_err(|_| OrdError::SignatureInvalid)?;
        let output_key = XOnlyPublicKey::from_slice(&prevout.script_pubkey.as_bytes()[2..34])?;
        let sighash = taproot_sighash(psbt, index, sig.hash_ty)?;

        verify_schnorr(sighash, &sig.sig, &output_key)
    } else {
        if witness.len() != 2 {
            return Err(OrdError::SignatureInvalid);
        }
        let raw_sig = witness.nth(0).ok_or(OrdError::SignatureInvalid)?;
        let raw_key = witness.nth(1).ok_or(OrdError::SignatureInvalid)?;
        let sig =
            bitcoin::ecdsa::Signature::from_slice(raw_sig).map_err(|_| OrdError::SignatureInvalid)?;
        let public_key = PublicKey::from_slice(raw_key).map_err(|_| OrdError::SignatureInvalid)?;

        // network has no effect on the script
        let expected = Address::p2wpkh(&public_key, Network::Bitcoin)?.script_pubkey();
        if expected != prevout.script_pubkey {
            return Err(OrdError::SignatureInvalid);
        }
        let sighash = p2wpkh_sighash(psbt, index, sig.hash_ty)?;

        verify_ecdsa(sighash, &sig.sig, &public_key.inner)
    }
}

/// Checks that `psbt` is a listing for `expected_outpoint`.
///
/// A listing has a single input spending the artifact, finalized by the seller. Since
/// the buyer still has to fund it, extraction may fail with `OutputsExceedInputs` and
/// nothing else.
pub fn validate_partial_tx(
    psbt: &Psbt,
    expected_outpoint: OutPoint,
    verify_signatures: bool,
) -> OrdResult<()> {
    let first = psbt
        .unsigned_tx
        .input
        .first()
        .ok_or_else(|| OrdError::InvalidOrder("listing has no inputs".to_string()))?;
    if first.previous_output != expected_outpoint {
        return Err(OrdError::InvalidOrder(format!(
            "listing spends {} instead of {expected_outpoint}",
            first.previous_output
        )));
    }
    if psbt.unsigned_tx.input.len() != 1 {
        return Err(OrdError::InvalidOrder(format!(
            "listing must have exactly one input, found {}",
            psbt.unsigned_tx.input.len()
        )));
    }
    if psbt.unsigned_tx.output.is_empty() {
        return Err(OrdError::InvalidOrder("listing has no outputs".to_string()));
    }

    match extract_tx(psbt) {
        Ok(_) | Err(OrdError::OutputsExceedInputs) => {}
        Err(OrdError::NotFinalized(_)) => {
            return Err(OrdError::InvalidOrder("listing is not signed".to_string()))
        }
        Err(err @ OrdError::InvalidOrder(_)) => return Err(err),
        Err(err) => return Err(OrdError::InvalidOrder(err.to_string())),
    }

    if verify_signatures {
        verify_input_signature(psbt, 0)?;
    }

    Ok(())
}

/// Checks that `psbt` is a bid for `expected_outpoint` and returns the offered price
/// along with the script it pays to.
///
/// Input 0 is left for the owner to sign; every following input must be finalized by
/// the bidder.
pub fn validate_bid_tx(
    psbt: &Psbt,
    expected_outpoint: OutPoint,
    verify_signatures: bool,
) -> OrdResult<(Amount, ScriptBuf)> {
    let tx = &psbt.unsigned_tx;
    match tx.input.first() {
        Some(txin) if txin.previous_output == expected_outpoint => {}
        Some(txin) => {
            return Err(OrdError::InvalidOrder(format!(
                "bid spends {} instead of {expected_outpoint}",
                txin.previous_output
            )))
        }
        None => return Err(OrdError::InvalidOrder("bid has no inputs".to_string())),
    }
    if tx.input.len() < 2 {
        return Err(OrdError::InvalidOrder("bid is not funded".to_string()));
    }
    let owner_output = tx
        .output
        .get(1)
        .ok_or_else(|| OrdError::InvalidOrder("bid has no owner output".to_string()))?;

    for index in 1..psbt.inputs.len() {
        if !is_finalized(&psbt.inputs[index]) {
            return Err(OrdError::InvalidOrder(format!(
                "bid funding input {index} is not signed"
            )));
        }
        if verify_signatures {
            verify_input_signature(psbt, index)?;
        }
    }

    Ok((owner_output.value, owner_output.script_pubkey.clone()))
}

/// Price asked by a listing, the value of its first output.
pub fn psbt_price(psbt: &Psbt) -> OrdResult<Amount> {
    psbt.unsigned_tx
        .output
        .first()
        .map(|output| output.value)
        .ok_or_else(|| OrdError::InvalidOrder("psbt has no outputs".to_string()))
}
