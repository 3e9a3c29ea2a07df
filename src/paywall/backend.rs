//! Collaborators behind the payment gate: address derivation and transaction lookup.
//!
//! The HTTP backend talks to a wallet service that owns the extended public key
//! and the chain index. Scanning internals live there, not here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use crate::APP_USER_AGENT;

/// A payment observed on a paywall address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Amount in the smallest unit of the payment currency.
    pub amount: u64,
    pub confirmations: u32,
    /// Unix seconds at which the transaction was first seen.
    pub timestamp: i64,
}

#[async_trait]
pub trait AddressDeriver: Send + Sync {
    /// Derive the payment address assigned to `user_id`.
    async fn derive(&self, user_id: Uuid) -> Result<String>;
}

#[async_trait]
pub trait TxLookup: Send + Sync {
    /// Every transaction paying into `address`.
    async fn transactions(&self, address: &str) -> Result<Vec<Transaction>>;
}

/// Stand-in used when the paywall is disabled; any call is a configuration error.
#[derive(Clone, Debug, Default)]
pub struct UnconfiguredPaywall;

#[async_trait]
impl AddressDeriver for UnconfiguredPaywall {
    async fn derive(&self, _user_id: Uuid) -> Result<String> {
        Err(anyhow!("paywall backend is not configured"))
    }
}

#[async_trait]
impl TxLookup for UnconfiguredPaywall {
    async fn transactions(&self, _address: &str) -> Result<Vec<Transaction>> {
        Err(anyhow!("paywall backend is not configured"))
    }
}

#[derive(Serialize)]
struct DeriveRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct DeriveResponse {
    address: String,
}

/// Wallet service client: `POST {base}/address`, `GET {base}/address/{address}/transactions`.
#[derive(Clone, Debug)]
pub struct HttpPaywallBackend {
    client: Client,
    base_url: Url,
}

impl HttpPaywallBackend {
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).with_context(|| format!("invalid paywall backend url: {base_url}"))?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build paywall http client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid paywall endpoint: {path}"))
    }
}

#[async_trait]
impl AddressDeriver for HttpPaywallBackend {
    async fn derive(&self, user_id: Uuid) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("address")?)
            .json(&DeriveRequest { user_id })
            .send()
            .await
            .context("paywall address request failed")?
            .error_for_status()
            .context("paywall address request rejected")?;
        let body: DeriveResponse = response
            .json()
            .await
            .context("invalid paywall address response")?;
        Ok(body.address)
    }
}

#[async_trait]
impl TxLookup for HttpPaywallBackend {
    async fn transactions(&self, address: &str) -> Result<Vec<Transaction>> {
        let mut url = self.endpoint("address")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("paywall backend url cannot be a base"))?
            .push(address)
            .push("transactions");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("paywall transaction lookup failed")?
            .error_for_status()
            .context("paywall transaction lookup rejected")?;
        response
            .json()
            .await
            .context("invalid paywall transaction response")
    }
}
