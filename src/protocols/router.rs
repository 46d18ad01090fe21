//! Router protocol HTTP adapter
//!
//! Thin reqwest client against the aggregator's JSON API. Responses are
//! deserialized into the shared wire types; HTTP status codes are
//! normalized into [`ClientError`] without any classification — that is
//! the pipeline's job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{ExecuteRequest, GasEstimate, QuoteRequest, Route, TxResult};
use super::{ClientError, RouterProtocol};

#[derive(Clone)]
pub struct HttpRouterClient {
    http: Client,
    base_url: String,
}

impl HttpRouterClient {
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
        debug!(%url, "router request");

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
}

/// Map non-success statuses into transport errors and decode the body.
pub(crate) async fn decode_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, ClientError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let reset_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(5);
        return Err(ClientError::RateLimited {
            reset_at: Utc::now() + ChronoDuration::seconds(reset_secs),
        });
    }

    if status.is_server_error() {
        return Err(ClientError::Unavailable(format!("status {status}")));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Rejected {
            code: status.as_str().to_string(),
            message: body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RouterProtocol for HttpRouterClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<Route, ClientError> {
        self.post_json("/v1/quote", request).await
    }

    async fn routes(&self, request: &QuoteRequest) -> Result<Vec<Route>, ClientError> {
        self.post_json("/v1/routes", request).await
    }

    async fn estimate_gas(&self, request: &QuoteRequest) -> Result<GasEstimate, ClientError> {
        self.post_json("/v1/estimate-gas", request).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<TxResult, ClientError> {
        self.post_json("/v1/execute", request).await
    }
}
