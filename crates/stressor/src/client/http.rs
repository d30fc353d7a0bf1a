//! HTTP implementation of the chain client.

use crate::client::types::{
    AccountInfo, BlockInfo, BroadcastRequest, BroadcastResponse, NodeStatus,
};
use crate::client::{ChainClient, RpcError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Chain client over a JSON HTTP API.
///
/// Endpoints: `GET /status`, `GET /accounts/{address}`,
/// `POST /transactions`, `GET /blocks/{height}`.
pub struct HttpChainClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpChainClient {
    /// Create a new client for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let base_url = endpoint.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a new client with a per-request timeout.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, client })
    }

    /// The endpoint this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RpcError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RpcError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RpcError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn status(&self) -> Result<NodeStatus, RpcError> {
        self.get_json("/status").await
    }

    async fn account_info(&self, address: &str) -> Result<AccountInfo, RpcError> {
        self.get_json(&format!("/accounts/{address}")).await
    }

    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<BroadcastResponse, RpcError> {
        let request = BroadcastRequest {
            tx_hex: hex::encode(tx_bytes),
        };
        self.post_json("/transactions", &request).await
    }

    async fn block(&self, height: u64) -> Result<BlockInfo, RpcError> {
        self.get_json(&format!("/blocks/{height}")).await
    }
}
