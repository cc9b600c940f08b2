use bitcoin::absolute::LockTime;
use bitcoin::psbt::{Input, Psbt};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use super::psbt::{extract_tx, is_finalized, sign_input, spent_output, SighashScope};
use super::signer::{InputForm, Signer};
use super::FundingInput;
use crate::config::MarketConfig;
use crate::utils::constants::ARTIFACT_OUTPUT_VALUE;
use crate::utils::fees::{bid_change, buy_change, calculate_fee, checked_sum};
use crate::{OrdError, OrdResult};

/// Number of dummy inputs in front of the seller input of a buy.
///
/// The seller signs with `SIGHASH_SINGLE`, committing to the output at the index of its
/// input; two dummy inputs put the seller input in front of the seller output.
pub const BUY_DUMMY_INPUTS: usize = 2;
/// Index of the seller payment output in a buy.
const SELLER_OUTPUT_INDEX: usize = 2;

/// Arguments for listing an inscription for sale.
#[derive(Debug, Clone)]
pub struct ListingArgs {
    /// Output carrying the inscription, owned by the seller.
    pub inscription_input: FundingInput,
    /// Address receiving the price
    pub payment_address: Address,
    pub price: Amount,
}

/// Arguments for buying a listed inscription.
#[derive(Debug, Clone)]
pub struct BuyArgs {
    /// Listing signed by the seller
    pub seller_psbt: Psbt,
    /// Small outputs of the buyer padding the inscription position
    pub dummy_inputs: Vec<FundingInput>,
    pub payment_inputs: Vec<FundingInput>,
    /// Address receiving the inscription and the dummy value
    pub receiver_address: Address,
    pub change_address: Address,
    pub fee_rate: f64,
}

/// Arguments for bidding on an inscription.
#[derive(Debug, Clone)]
pub struct BidArgs {
    /// Output carrying the inscription, owned by someone else.
    pub inscription_input: FundingInput,
    /// Current owner of the inscription, receiving the bid
    pub owner_address: Address,
    /// Address receiving the inscription
    pub receiver_address: Address,
    pub change_address: Address,
    pub bid_price: Amount,
    pub payment_inputs: Vec<FundingInput>,
    pub fee_rate: f64,
}

/// Arguments for spending a single output of the wallet.
#[derive(Debug, Clone)]
pub struct SendArgs {
    pub input: FundingInput,
    pub destination: Address,
    pub value: Amount,
    /// Address and value of the remainder, if any.
    pub change: Option<(Address, Amount)>,
}

/// Builds the partially signed transactions of the marketplace trades.
#[derive(Debug, Clone)]
pub struct MarketTransactionBuilder {
    artifact_output_value: Amount,
}

impl Default for MarketTransactionBuilder {
    fn default() -> Self {
        Self {
            artifact_output_value: Amount::from_sat(ARTIFACT_OUTPUT_VALUE),
        }
    }
}

fn txin(input: &FundingInput) -> TxIn {
    TxIn {
        previous_output: input.utxo.outpoint(),
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    }
}

fn unsigned_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// PSBT input spending an output of `signer`, described in the signer's input form.
fn owned_input(
    input: &FundingInput,
    signer: &dyn Signer,
    scope: SighashScope,
) -> OrdResult<Input> {
    let tx_out = input.tx_out()?;
    let info = signer.address_info();
    if tx_out.script_pubkey != info.script_pubkey {
        return Err(OrdError::InvalidOrder(format!(
            "{} is not owned by {}",
            input.utxo.outpoint(),
            info.address
        )));
    }

    let mut psbt_input = Input {
        witness_utxo: Some(tx_out.clone()),
        sighash_type: Some(scope.psbt_sighash_type(signer.sig_scheme())),
        ..Default::default()
    };
    match signer.input_form() {
        InputForm::TaprootKeyPath => {
            psbt_input.tap_internal_key = Some(info.internal_key.ok_or(OrdError::InvalidScriptType)?)
        }
        InputForm::NonWitness => psbt_input.non_witness_utxo = Some(input.previous_tx.clone()),
    }

    Ok(psbt_input)
}

fn total_value(inputs: &[FundingInput]) -> OrdResult<Amount> {
    checked_sum(inputs.iter().map(|input| Amount::from_sat(input.utxo.value)))
        .ok_or_else(|| OrdError::InvalidOrder("input value overflows".to_string()))
}

/// Signs every unfinalized input spending an output of `signer`.
async fn sign_owned_inputs(
    psbt: &mut Psbt,
    signer: &dyn Signer,
    scope: SighashScope,
    skip: usize,
) -> OrdResult<usize> {
    let script_pubkey = signer.address_info().script_pubkey.clone();
    let mut signed = 0;

    for index in skip..psbt.inputs.len() {
        if is_finalized(&psbt.inputs[index]) {
            continue;
        }
        if spent_output(psbt, index)?.script_pubkey != script_pubkey {
            continue;
        }
        sign_input(psbt, index, signer, scope).await?;
        signed += 1;
    }

    Ok(signed)
}

impl MarketTransactionBuilder {
    pub fn new(artifact_output_value: Amount) -> Self {
        Self {
            artifact_output_value,
        }
    }

    pub fn from_config(config: &MarketConfig) -> Self {
        Self::new(Amount::from_sat(config.artifact_output_value))
    }

    /// Builds the unsigned listing of an inscription: its output as the only input, the
    /// price to the seller as the only output.
    pub fn build_listing(&self, args: ListingArgs, signer: &dyn Signer) -> OrdResult<Psbt> {
        let input = owned_input(
            &args.inscription_input,
            signer,
            SighashScope::SingleAnyoneCanPay,
        )?;
        let tx = unsigned_tx(
            vec![txin(&args.inscription_input)],
            vec![TxOut {
                value: args.price,
                script_pubkey: args.payment_address.script_pubkey(),
            }],
        );

        let mut psbt = Psbt::from_unsigned_tx(tx)?;
        psbt.inputs[0] = input;
        debug!(
            "listing {} for {}",
            args.inscription_input.utxo.outpoint(),
            args.price
        );

        Ok(psbt)
    }

    /// Signs the listing input with `SIGHASH_SINGLE|ANYONECANPAY`, so that a buyer can add
    /// inputs and outputs without invalidating it.
    pub async fn sign_listing(&self, psbt: &mut Psbt, signer: &dyn Signer) -> OrdResult<()> {
        if psbt.inputs.len() != 1 {
            return Err(OrdError::InvalidOrder(
                "listing must have exactly one input".to_string(),
            ));
        }
        sign_input(psbt, 0, signer, SighashScope::SingleAnyoneCanPay).await
    }

    /// Builds a transaction spending `args.input` alone, with `SIGHASH_ALL`.
    pub fn build_send(&self, args: SendArgs, signer: &dyn Signer) -> OrdResult<Psbt> {
        let input = owned_input(&args.input, signer, SighashScope::All)?;
        let mut outputs = vec![TxOut {
            value: args.value,
            script_pubkey: args.destination.script_pubkey(),
        }];
        if let Some((address, value)) = &args.change {
            outputs.push(TxOut {
                value: *value,
                script_pubkey: address.script_pubkey(),
            });
        }

        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(vec![txin(&args.input)], outputs))?;
        psbt.inputs[0] = input;
        debug!(
            "sending {} out of {} to {}",
            args.value,
            args.input.utxo.outpoint(),
            args.destination
        );

        Ok(psbt)
    }

    /// Extends a signed listing into a funded transaction for the buyer.
    ///
    /// Inputs: the dummy inputs, the seller input, the payment inputs.
    /// Outputs: the dummy value and the inscription to the receiver, the seller payment,
    /// the change.
    pub fn build_buy(&self, args: BuyArgs, signer: &dyn Signer) -> OrdResult<Psbt> {
        if args.dummy_inputs.is_empty() {
            return Err(OrdError::MissingDummyUtxo);
        }
        if args.dummy_inputs.len() != BUY_DUMMY_INPUTS {
            return Err(OrdError::InvalidOrder(format!(
                "buy needs {BUY_DUMMY_INPUTS} dummy inputs, got {}",
                args.dummy_inputs.len()
            )));
        }
        let seller_txin = args
            .seller_psbt
            .unsigned_tx
            .input
            .first()
            .cloned()
            .ok_or(OrdError::InputNotFound(0))?;
        let seller_input = args
            .seller_psbt
            .inputs
            .first()
            .cloned()
            .ok_or(OrdError::InputNotFound(0))?;
        let seller_output = args
            .seller_psbt
            .unsigned_tx
            .output
            .first()
            .cloned()
            .ok_or_else(|| OrdError::InvalidOrder("listing has no outputs".to_string()))?;
        let inscription_value = spent_output(&args.seller_psbt, 0)?.value;
        let price = seller_output.value;

        let total_dummy = total_value(&args.dummy_inputs)?;
        let total_funding = total_value(&args.payment_inputs)?;
        let input_count = args.dummy_inputs.len() + 1 + args.payment_inputs.len();
        let fee = calculate_fee(input_count, 3, args.fee_rate, 1)?;
        let change = buy_change(total_funding, total_dummy, price, fee)?;

        let mut txins = Vec::with_capacity(input_count);
        let mut inputs = Vec::with_capacity(input_count);
        for dummy in &args.dummy_inputs {
            txins.push(txin(dummy));
            inputs.push(owned_input(dummy, signer, SighashScope::All)?);
        }
        txins.push(seller_txin);
        inputs.push(seller_input);
        for payment in &args.payment_inputs {
            txins.push(txin(payment));
            inputs.push(owned_input(payment, signer, SighashScope::All)?);
        }

        let receiver = args.receiver_address.script_pubkey();
        let outputs = vec![
            TxOut {
                value: total_dummy,
                script_pubkey: receiver.clone(),
            },
            TxOut {
                value: inscription_value,
                script_pubkey: receiver,
            },
            seller_output,
            TxOut {
                value: change,
                script_pubkey: args.change_address.script_pubkey(),
            },
        ];

        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(txins, outputs))?;
        psbt.inputs = inputs;
        debug!("buy for {price}: fee {fee}, change {change}");

        Ok(psbt)
    }

    /// Signs the buyer inputs of a buy with `SIGHASH_ALL` and extracts the transaction.
    pub async fn sign_buyer_inputs(
        &self,
        psbt: &mut Psbt,
        signer: &dyn Signer,
    ) -> OrdResult<Transaction> {
        let signed = sign_owned_inputs(psbt, signer, SighashScope::All, 0).await?;
        debug!("signed {signed} buyer inputs");

        extract_tx(psbt)
    }

    /// Signs the input of a send and extracts the transaction.
    pub async fn sign_send(&self, psbt: &mut Psbt, signer: &dyn Signer) -> OrdResult<Transaction> {
        if sign_owned_inputs(psbt, signer, SighashScope::All, 0).await? != 1 {
            return Err(OrdError::InvalidOrder(
                "send must spend exactly one output of the signer".to_string(),
            ));
        }

        extract_tx(psbt)
    }

    /// Builds an offer for an inscription the signer doesn't own.
    ///
    /// Input 0 spends the inscription and is left for the owner to sign, the bidder funds
    /// the rest. Outputs: the inscription to the bidder, the bid to the owner, the change.
    pub fn build_bid(&self, args: BidArgs, signer: &dyn Signer) -> OrdResult<Psbt> {
        let inscription_out = args.inscription_input.tx_out()?.clone();
        let total_funding = total_value(&args.payment_inputs)?;
        let fee = calculate_fee(1 + args.payment_inputs.len(), 2, args.fee_rate, 1)?;
        let change = bid_change(
            inscription_out.value,
            total_funding,
            args.bid_price,
            fee,
            self.artifact_output_value,
        )?;

        let mut txins = vec![txin(&args.inscription_input)];
        let mut inputs = vec![Input {
            witness_utxo: Some(inscription_out),
            non_witness_utxo: Some(args.inscription_input.previous_tx.clone()),
            ..Default::default()
        }];
        for payment in &args.payment_inputs {
            txins.push(txin(payment));
            inputs.push(owned_input(payment, signer, SighashScope::AllAnyoneCanPay)?);
        }

        let outputs = vec![
            TxOut {
                value: self.artifact_output_value,
                script_pubkey: args.receiver_address.script_pubkey(),
            },
            TxOut {
                value: args.bid_price,
                script_pubkey: args.owner_address.script_pubkey(),
            },
            TxOut {
                value: change,
                script_pubkey: args.change_address.script_pubkey(),
            },
        ];

        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(txins, outputs))?;
        psbt.inputs = inputs;
        debug!(
            "bid of {} on {}: fee {fee}, change {change}",
            args.bid_price,
            args.inscription_input.utxo.outpoint()
        );

        Ok(psbt)
    }

    /// Signs the bidder inputs with `SIGHASH_ALL|ANYONECANPAY`: the outputs are locked,
    /// the owner can still sign the inscription input.
    pub async fn sign_bid(&self, psbt: &mut Psbt, signer: &dyn Signer) -> OrdResult<()> {
        let signed = sign_owned_inputs(psbt, signer, SighashScope::AllAnyoneCanPay, 1).await?;
        if signed == 0 {
            return Err(OrdError::InvalidOrder(
                "bid has no inputs owned by the bidder".to_string(),
            ));
        }

        Ok(())
    }

    /// Accepts a bid as the owner of the inscription: signs input 0 and extracts the
    /// final transaction.
    pub async fn accept_bid(&self, mut psbt: Psbt, signer: &dyn Signer) -> OrdResult<Transaction> {
        let info = signer.address_info();
        let owner_output = psbt
            .unsigned_tx
            .output
            .get(1)
            .ok_or_else(|| OrdError::InvalidOrder("bid has no owner output".to_string()))?;
        if owner_output.script_pubkey != info.script_pubkey {
            return Err(OrdError::InvalidOrder(format!(
                "bid does not pay {}",
                info.address
            )));
        }
        if spent_output(&psbt, 0)?.script_pubkey != info.script_pubkey {
            return Err(OrdError::InvalidOrder(format!(
                "inscription is not owned by {}",
                info.address
            )));
        }

        let scheme = signer.sig_scheme();
        let input = psbt.inputs.get_mut(0).ok_or(OrdError::InputNotFound(0))?;
        if signer.input_form() == InputForm::TaprootKeyPath {
            input.tap_internal_key = info.internal_key;
        }
        input.sighash_type = Some(SighashScope::All.psbt_sighash_type(scheme));

        sign_input(&mut psbt, 0, signer, SighashScope::All).await?;
        info!(
            "accepted bid of {} for {}",
            psbt.unsigned_tx.output[1].value, psbt.unsigned_tx.input[0].previous_output
        );

        extract_tx(&psbt)
    }
}
