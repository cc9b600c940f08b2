use bitcoin::{Amount, OutPoint};
use serde::Deserialize;

use super::ArtifactOracle;
use crate::inscription::{parse_raw_outpoint, InscriptionId, InscriptionRef};
use crate::{OrdError, OrdResult};

/// [`ArtifactOracle`] over an `ord` explorer JSON api.
///
/// Inscription locations come from an outpoint api returning the consensus encoded
/// outpoint of an inscription.
#[derive(Debug, Clone)]
pub struct OrdExplorerClient {
    client: reqwest::Client,
    explorer_url: String,
    outpoint_api_url: String,
}

#[derive(Debug, Deserialize)]
struct OutputJson {
    #[serde(default)]
    inscriptions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InscriptionJson {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    value: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OutpointJson {
    inscription: RawOutpoint,
}

#[derive(Debug, Deserialize)]
struct RawOutpoint {
    outpoint: String,
}

impl OrdExplorerClient {
    pub fn new(explorer_url: impl Into<String>, outpoint_api_url: impl Into<String>) -> Self {
        let explorer_url: String = explorer_url.into();
        let outpoint_api_url: String = outpoint_api_url.into();
        Self {
            client: reqwest::Client::new(),
            explorer_url: explorer_url.trim_end_matches('/').to_string(),
            outpoint_api_url: outpoint_api_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> OrdResult<T> {
        debug!("GET {url}");
        Ok(self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait::async_trait]
impl ArtifactOracle for OrdExplorerClient {
    async fn carries_inscription(&self, outpoint: &OutPoint) -> OrdResult<bool> {
        let output: OutputJson = self
            .get_json(format!("{}/output/{outpoint}", self.explorer_url))
            .await?;

        Ok(!output.inscriptions.is_empty())
    }

    async fn inscription(&self, id: &InscriptionId) -> OrdResult<InscriptionRef> {
        let location: OutpointJson = self
            .get_json(format!("{}/inscription/{id}/outpoint", self.outpoint_api_url))
            .await?;
        let outpoint = parse_raw_outpoint(&location.inscription.outpoint)?;

        let details: InscriptionJson = self
            .get_json(format!("{}/inscription/{id}", self.explorer_url))
            .await?;
        let value = details
            .value
            .ok_or_else(|| OrdError::Network(format!("inscription {id} has no value")))?;

        Ok(InscriptionRef {
            inscription_id: *id,
            outpoint,
            owner: details.address,
            value: Amount::from_sat(value),
        })
    }
}
