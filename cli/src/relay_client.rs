use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;

use boilerfuel_core::error::SyncError;
use boilerfuel_core::relay::{CreateResponse, PullResponse, PushRequest, PushResponse};
use boilerfuel_core::sync::RelayTransport;

/// `RelayTransport` over the relay's HTTP API.
pub struct HttpRelay {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

fn network(e: &reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

impl HttpRelay {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "boilerfuel-cli/{} (nutrition log sync)",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::TokenNotFound);
        }
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(SyncError::Relay(format!("{}: {message}", status.as_u16())))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, SyncError> {
        let resp = Self::check(resp).await?;
        resp.json()
            .await
            .map_err(|e| SyncError::Parse(e.to_string()))
    }
}

impl RelayTransport for HttpRelay {
    async fn create(&self) -> Result<String, SyncError> {
        let resp = self
            .client
            .post(self.url("/api/sync"))
            .send()
            .await
            .map_err(|e| network(&e))?;
        let body: CreateResponse = Self::read_json(resp).await?;
        Ok(body.token)
    }

    async fn push(
        &self,
        token: &str,
        ciphertext: &str,
        updated_at: i64,
    ) -> Result<PushResponse, SyncError> {
        let request = PushRequest {
            ciphertext: ciphertext.to_string(),
            updated_at,
        };
        let resp = self
            .client
            .put(self.url(&format!("/api/sync/{token}")))
            .json(&request)
            .send()
            .await
            .map_err(|e| network(&e))?;
        Self::read_json(resp).await
    }

    async fn pull(&self, token: &str, since: Option<i64>) -> Result<PullResponse, SyncError> {
        let mut req = self.client.get(self.url(&format!("/api/sync/{token}")));
        if let Some(since) = since {
            req = req.query(&[("since", since)]);
        }
        let resp = req.send().await.map_err(|e| network(&e))?;
        Self::read_json(resp).await
    }

    async fn unpair(&self, token: &str) -> Result<(), SyncError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/sync/{token}")))
            .send()
            .await
            .map_err(|e| network(&e))?;
        Self::check(resp).await?;
        Ok(())
    }
}
