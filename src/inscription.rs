mod iid;

use bitcoin::{Amount, OutPoint};
pub use iid::InscriptionId;
use serde::{Deserialize, Serialize};

use crate::OrdResult;

/// An inscription together with the output currently carrying it.
///
/// The output must never be spent as plain payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionRef {
    pub inscription_id: InscriptionId,
    pub outpoint: OutPoint,
    /// Address currently holding the inscription, when the oracle knows it.
    pub owner: Option<String>,
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
}

/// Parses an outpoint from its 36 bytes consensus encoding, hex encoded.
///
/// Explorers report the satpoint outpoint in this form.
pub fn parse_raw_outpoint(raw: &str) -> OrdResult<OutPoint> {
    let bytes = hex::decode(raw)?;
    Ok(bitcoin::consensus::deserialize(&bytes)?)
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash;
    use bitcoin::Txid;

    use super::*;

    #[test]
    fn test_should_parse_raw_outpoint() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([7; 32]),
            vout: 2,
        };
        let raw = hex::encode(bitcoin::consensus::serialize(&outpoint));
        assert_eq!(raw.len(), 72);
        assert_eq!(parse_raw_outpoint(&raw).unwrap(), outpoint);

        assert!(parse_raw_outpoint("zz").is_err());
        assert!(parse_raw_outpoint("0011").is_err());
    }
}
