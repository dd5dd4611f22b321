use crate::error::AppError;
use crate::market::types::{
    accounts_from_wire, stocks_from_wire, AccountLedger, Stock, StockWire, TraderAccount,
    TraderAccountWire,
};
use reqwest::Client;
use std::future::Future;

/// Request/response collaborator that supplies authoritative baselines.
pub trait BaselineSource: Send + Sync + 'static {
    fn fetch_entities(&self) -> impl Future<Output = Result<Vec<Stock>, AppError>> + Send;

    fn fetch_account(
        &self,
        trader_id: &str,
    ) -> impl Future<Output = Result<TraderAccount, AppError>> + Send;

    fn fetch_account_ledger(
        &self,
        trader_id: &str,
    ) -> impl Future<Output = Result<AccountLedger, AppError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpBaseline {
    client: Client,
    base_url: String,
    collection: String,
}

impl HttpBaseline {
    pub fn new(client: Client, base_url: &str, collection: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        }
    }
}

fn collection_endpoint(base_url: &str, collection: &str) -> String {
    format!("{base_url}/{collection}")
}

fn trader_endpoint(base_url: &str, trader_id: &str) -> String {
    format!("{base_url}/traders/{trader_id}")
}

fn trader_transactions_endpoint(base_url: &str, trader_id: &str) -> String {
    format!("{base_url}/traders/{trader_id}/transactions")
}

impl BaselineSource for HttpBaseline {
    async fn fetch_entities(&self) -> Result<Vec<Stock>, AppError> {
        let endpoint = collection_endpoint(&self.base_url, &self.collection);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<StockWire>>().await?;
        stocks_from_wire(payload)
    }

    async fn fetch_account(&self, trader_id: &str) -> Result<TraderAccount, AppError> {
        let endpoint = trader_endpoint(&self.base_url, trader_id);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<TraderAccountWire>().await?;
        let mut accounts = accounts_from_wire(vec![payload])?;
        accounts
            .pop()
            .ok_or_else(|| AppError::InvalidArgument("empty trader payload".to_string()))
    }

    async fn fetch_account_ledger(&self, trader_id: &str) -> Result<AccountLedger, AppError> {
        let endpoint = trader_transactions_endpoint(&self.base_url, trader_id);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<AccountLedger>().await?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_endpoint_appends_collection() {
        let endpoint = collection_endpoint("http://localhost:8080/api/v1", "stocks");
        assert_eq!(endpoint, "http://localhost:8080/api/v1/stocks");
    }

    #[test]
    fn trader_endpoints_embed_trader_id() {
        assert!(trader_endpoint("http://h/api/v1", "t7").ends_with("/traders/t7"));
        assert!(trader_transactions_endpoint("http://h/api/v1", "t7")
            .ends_with("/traders/t7/transactions"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let baseline = HttpBaseline::new(Client::new(), "http://h/api/v1/", "stocks");
        assert_eq!(
            collection_endpoint(&baseline.base_url, &baseline.collection),
            "http://h/api/v1/stocks"
        );
    }
}
