use std::str::FromStr;

use bitcoin::{OutPoint, Txid};
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::InscriptionParseError;

const TXID_LEN: usize = 64;

/// Id of an inscription, `<txid>i<index>`.
///
/// Serialized as its display string.
#[derive(
    Debug, PartialEq, Copy, Clone, Hash, Eq, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct InscriptionId {
    pub txid: Txid,
    pub index: u32,
}

impl InscriptionId {
    /// Id of the inscription revealed in `outpoint`'s transaction at that index.
    pub fn from_outpoint(outpoint: OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            index: outpoint.vout,
        }
    }
}

impl std::fmt::Display for InscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}i{}", self.txid, self.index)
    }
}

impl FromStr for InscriptionId {
    type Err = InscriptionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(char) = s.chars().find(|char| !char.is_ascii()) {
            return Err(InscriptionParseError::Character(char));
        }

        if s.len() < TXID_LEN + 2 {
            return Err(InscriptionParseError::Length(s.len()));
        }

        let (txid, rest) = s.split_at(TXID_LEN);
        let mut rest = rest.chars();
        match rest.next() {
            Some('i') => {}
            Some(separator) => return Err(InscriptionParseError::Separator(separator)),
            None => return Err(InscriptionParseError::Length(s.len())),
        }

        Ok(Self {
            txid: txid
                .parse::<Txid>()
                .map_err(|e| InscriptionParseError::Txid(e.to_string()))?,
            index: rest.as_str().parse().map_err(InscriptionParseError::Index)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn test_should_display_and_parse() {
        let id: InscriptionId = format!("{TXID}i4294967295").parse().unwrap();
        assert_eq!(id.index, u32::MAX);
        assert_eq!(id.txid.to_string(), TXID);
        assert_eq!(id.to_string(), format!("{TXID}i4294967295"));
    }

    #[test]
    fn test_should_serialize_as_string() {
        let id: InscriptionId = format!("{TXID}i0").parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{TXID}i0\""));
        assert_eq!(serde_json::from_str::<InscriptionId>(&json).unwrap(), id);
    }

    #[test]
    fn test_should_reject_malformed_ids() {
        assert!(matches!(
            "→".parse::<InscriptionId>(),
            Err(InscriptionParseError::Character('→'))
        ));
        assert!(matches!(
            "foo".parse::<InscriptionId>(),
            Err(InscriptionParseError::Length(3))
        ));
        assert!(matches!(
            format!("{TXID}x0").parse::<InscriptionId>(),
            Err(InscriptionParseError::Separator('x'))
        ));
        assert!(matches!(
            format!("{TXID}ifoo").parse::<InscriptionId>(),
            Err(InscriptionParseError::Index(_))
        ));
        assert!(matches!(
            format!("x{}i0", &TXID[1..]).parse::<InscriptionId>(),
            Err(InscriptionParseError::Txid(_))
        ));
    }
}
