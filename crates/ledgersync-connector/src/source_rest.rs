//! REST client for the Source accounting system.
//!
//! The Source API authenticates with a static access token header and
//! paginates list endpoints with page number + page size; a short page
//! marks the end of the collection.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::SourceClient;
use crate::types::{SourceCustomer, SourceInvoice, SourcePayment, SourceProduct};

const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";
const PAGE_SIZE: usize = 250;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// REST implementation of [`SourceClient`].
pub struct RestSourceClient {
    base_url: String,
    client: Client,
    access_token: String,
}

impl std::fmt::Debug for RestSourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestSourceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    items: Vec<T>,
}

impl RestSourceClient {
    /// Create a client for the given base URL and access token.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConnectorError::InvalidCredentialFormat {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            access_token: access_token.into(),
        })
    }

    /// Fetch one page of a list endpoint.
    async fn fetch_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: usize,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<T>> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .query(&[("page", page.to_string()), ("pagesize", PAGE_SIZE.to_string())]);

        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ConnectorError::AuthenticationFailed)
            }
            status if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                Err(ConnectorError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
            _ => {
                let envelope: ListEnvelope<T> = response
                    .json()
                    .await
                    .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
                Ok(envelope.items)
            }
        }
    }

    /// Fetch all pages of a list endpoint.
    async fn fetch_all<T: DeserializeOwned>(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let items: Vec<T> = self.fetch_page(path, page, since).await?;
            let count = items.len();
            all.extend(items);

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!(path, pages = page, records = all.len(), "Fetched source collection");
        Ok(all)
    }
}

#[async_trait::async_trait]
impl SourceClient for RestSourceClient {
    async fn test_connection(&self) -> ConnectorResult<()> {
        // Request a minimal page to verify URL and token.
        self.fetch_page::<SourceCustomer>("/customers", 1, None)
            .await
            .map(|_| ())
    }

    async fn fetch_customers(&self) -> ConnectorResult<Vec<SourceCustomer>> {
        self.fetch_all("/customers", None).await
    }

    async fn fetch_products(&self) -> ConnectorResult<Vec<SourceProduct>> {
        self.fetch_all("/products", None).await
    }

    async fn fetch_invoices(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourceInvoice>> {
        self.fetch_all("/invoices", since).await
    }

    async fn fetch_payments(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> ConnectorResult<Vec<SourcePayment>> {
        self.fetch_all("/payments", since).await
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout {
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    } else {
        ConnectorError::connection_failed_with_source("source request failed", e)
    }
}
