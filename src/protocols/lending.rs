//! Lending protocol HTTP adapter

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::router::decode_response;
use super::types::{Asset, LendingRequest, Position, TxResult};
use super::{ClientError, LendingProtocol};

#[derive(Clone)]
pub struct HttpLendingClient {
    http: Client,
    base_url: String,
}

impl HttpLendingClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_idle_timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "lending request");

        let started = std::time::Instant::now();
        let response = self.http.post(&url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                ClientError::Http(e)
            }
        })?;

        decode_response(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "lending request");

        let started = std::time::Instant::now();
        let response = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            } else {
                ClientError::Http(e)
            }
        })?;

        decode_response(response).await
    }
}

#[async_trait]
impl LendingProtocol for HttpLendingClient {
    async fn supported_assets(&self) -> Result<Vec<Asset>, ClientError> {
        self.get_json("/v1/assets").await
    }

    async fn supply(&self, request: &LendingRequest) -> Result<TxResult, ClientError> {
        self.post_json("/v1/supply", request).await
    }

    async fn withdraw(&self, request: &LendingRequest) -> Result<TxResult, ClientError> {
        self.post_json("/v1/withdraw", request).await
    }

    async fn borrow(&self, request: &LendingRequest) -> Result<TxResult, ClientError> {
        self.post_json("/v1/borrow", request).await
    }

    async fn repay(&self, request: &LendingRequest) -> Result<TxResult, ClientError> {
        self.post_json("/v1/repay", request).await
    }

    async fn user_position(&self, user_address: &str) -> Result<Position, ClientError> {
        self.get_json(&format!("/v1/positions/{user_address}")).await
    }

    async fn health_factor(&self, user_address: &str) -> Result<f64, ClientError> {
        #[derive(serde::Deserialize)]
        struct HealthFactorResponse {
            health_factor: f64,
        }
        let resp: HealthFactorResponse = self
            .get_json(&format!("/v1/positions/{user_address}/health"))
            .await?;
        Ok(resp.health_factor)
    }
}
