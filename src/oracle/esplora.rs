use bitcoin::{Address, OutPoint, Transaction, Txid};
use serde::Deserialize;

use super::{ChainOracle, FeeRates};
use crate::wallet::Utxo;
use crate::{OrdError, OrdResult};

/// [`ChainOracle`] over an Esplora REST api, such as mempool.space or blockstream.info.
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OutSpend {
    spent: bool,
}

impl EsploraClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait::async_trait]
impl ChainOracle for EsploraClient {
    async fn address_utxos(&self, address: &Address) -> OrdResult<Vec<Utxo>> {
        let url = self.url(&format!("/address/{address}/utxo"));
        debug!("GET {url}");
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn is_spent(&self, outpoint: &OutPoint) -> OrdResult<bool> {
        let url = self.url(&format!("/tx/{}/outspend/{}", outpoint.txid, outpoint.vout));
        debug!("GET {url}");
        let outspend: OutSpend = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(outspend.spent)
    }

    async fn transaction(&self, txid: &Txid) -> OrdResult<Transaction> {
        let url = self.url(&format!("/tx/{txid}/hex"));
        debug!("GET {url}");
        let tx_hex = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_tx_hex(&tx_hex)
    }

    async fn recommended_fees(&self) -> OrdResult<FeeRates> {
        let url = self.url("/v1/fees/recommended");
        debug!("GET {url}");
        Ok(self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn broadcast(&self, tx: &Transaction) -> OrdResult<Txid> {
        let url = self.url("/tx");
        let tx_hex = bitcoin::consensus::encode::serialize_hex(tx);
        info!("broadcasting transaction {}", tx.txid());

        let response = self.client.post(url).body(tx_hex).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OrdError::Network(format!("broadcast rejected ({status}): {body}")));
        }

        body.trim()
            .parse()
            .map_err(|_| OrdError::Network(format!("unexpected broadcast response: {body}")))
    }
}

fn parse_tx_hex(tx_hex: &str) -> OrdResult<Transaction> {
    let bytes = hex::decode(tx_hex.trim())?;
    Ok(bitcoin::consensus::deserialize(&bytes)?)
}
