//! REST client for the Target accounting system.
//!
//! The Target API is session-authenticated: the stored secret is exchanged
//! for a short-lived session token, which is cached for the lifetime of
//! the client and transparently renewed when the API reports it expired.
//! Updates are optimistic: every write-by-id presents the record version
//! read beforehand, and a stale version is rejected upstream.

use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::traits::TargetClient;
use crate::types::{CustomerFields, NewOrder, ProductFields, TargetRecord};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// REST implementation of [`TargetClient`].
pub struct RestTargetClient {
    base_url: String,
    client: Client,
    secret: String,
    /// Cached session token, shared across all calls made through this
    /// client instance.
    session: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for RestTargetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestTargetClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct IdEnvelope {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    items: Vec<T>,
}

#[derive(Debug, Serialize)]
struct VersionedUpdate<'a, T> {
    version: i64,
    #[serde(flatten)]
    fields: &'a T,
}

#[derive(Debug, Serialize)]
struct PaymentRequest {
    amount: Decimal,
    payment_date: NaiveDate,
}

impl RestTargetClient {
    /// Create a client for the given base URL and stored secret.
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> ConnectorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConnectorError::InvalidCredentialFormat {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            secret: secret.into(),
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the cached session token, creating one if necessary.
    async fn session_token(&self) -> ConnectorResult<String> {
        {
            let guard = self.session.read().await;
            if let Some(ref token) = *guard {
                return Ok(token.clone());
            }
        }
        self.renew_session().await
    }

    /// Exchange the stored secret for a fresh session token.
    async fn renew_session(&self) -> ConnectorResult<String> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "secret": self.secret }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(ConnectorError::AuthenticationFailed);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;

        let mut guard = self.session.write().await;
        *guard = Some(session.token.clone());
        debug!("Renewed target session token");

        Ok(session.token)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, url).bearer_auth(token);
        if !query.is_empty() {
            request = request.query(query);
        }
        request
    }

    /// Send a request, renewing the session once if the token expired.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> ConnectorResult<Response> {
        let mut token = self.session_token().await?;

        for attempt in 0..2 {
            let mut request = self.request(method.clone(), path, query, &token);
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(map_reqwest_error)?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                // Session expired mid-run; renew and retry once.
                self.session.write().await.take();
                token = self.renew_session().await?;
                continue;
            }

            return Ok(response);
        }

        Err(ConnectorError::AuthenticationFailed)
    }

    async fn expect_success(response: Response, identifier: &str) -> ConnectorResult<Response> {
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ConnectorError::AuthenticationFailed)
            }
            StatusCode::NOT_FOUND => Err(ConnectorError::RecordNotFound {
                identifier: identifier.to_string(),
            }),
            status if !status.is_success() => {
                let message = response.text().await.unwrap_or_default();
                Err(ConnectorError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
            _ => Ok(response),
        }
    }

    async fn find_by_key(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ConnectorResult<Option<TargetRecord>> {
        let response = self.send(Method::GET, path, query, None).await?;
        let response = Self::expect_success(response, path).await?;
        let envelope: ListEnvelope<TargetRecord> = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        Ok(envelope.items.into_iter().next())
    }

    async fn get_record(&self, path: &str) -> ConnectorResult<TargetRecord> {
        let response = self.send(Method::GET, path, &[], None).await?;
        let response = Self::expect_success(response, path).await?;
        response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))
    }

    async fn create_record<T: Serialize>(&self, path: &str, body: &T) -> ConnectorResult<i64> {
        let body = serde_json::to_value(body)
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        let response = self.send(Method::POST, path, &[], Some(body)).await?;
        let response = Self::expect_success(response, path).await?;
        let envelope: IdEnvelope = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        Ok(envelope.id)
    }

    async fn update_record<T: Serialize>(
        &self,
        path: &str,
        version: i64,
        fields: &T,
    ) -> ConnectorResult<()> {
        let body = serde_json::to_value(VersionedUpdate { version, fields })
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        let response = self.send(Method::PUT, path, &[], Some(body)).await?;
        Self::expect_success(response, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TargetClient for RestTargetClient {
    async fn test_connection(&self) -> ConnectorResult<()> {
        self.session_token().await.map(|_| ())
    }

    async fn find_customer_by_number(
        &self,
        number: &str,
    ) -> ConnectorResult<Option<TargetRecord>> {
        self.find_by_key("/customers", &[("number", number)]).await
    }

    async fn get_customer(&self, id: i64) -> ConnectorResult<TargetRecord> {
        self.get_record(&format!("/customers/{id}")).await
    }

    async fn create_customer(&self, fields: &CustomerFields) -> ConnectorResult<i64> {
        self.create_record("/customers", fields).await
    }

    async fn update_customer(
        &self,
        id: i64,
        version: i64,
        fields: &CustomerFields,
    ) -> ConnectorResult<()> {
        self.update_record(&format!("/customers/{id}"), version, fields)
            .await
    }

    async fn find_product_by_code(&self, code: &str) -> ConnectorResult<Option<TargetRecord>> {
        self.find_by_key("/products", &[("code", code)]).await
    }

    async fn get_product(&self, id: i64) -> ConnectorResult<TargetRecord> {
        self.get_record(&format!("/products/{id}")).await
    }

    async fn create_product(&self, fields: &ProductFields) -> ConnectorResult<i64> {
        self.create_record("/products", fields).await
    }

    async fn update_product(
        &self,
        id: i64,
        version: i64,
        fields: &ProductFields,
    ) -> ConnectorResult<()> {
        self.update_record(&format!("/products/{id}"), version, fields)
            .await
    }

    async fn create_order(&self, order: &NewOrder) -> ConnectorResult<i64> {
        self.create_record("/orders", order).await
    }

    async fn create_invoice_from_order(&self, order_id: i64) -> ConnectorResult<i64> {
        let path = format!("/orders/{order_id}/invoice");
        let response = self.send(Method::POST, &path, &[], None).await?;
        let response = Self::expect_success(response, &path).await?;
        let envelope: IdEnvelope = response
            .json()
            .await
            .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        Ok(envelope.id)
    }

    async fn register_payment(
        &self,
        invoice_id: i64,
        amount: Decimal,
        payment_date: NaiveDate,
    ) -> ConnectorResult<()> {
        let path = format!("/invoices/{invoice_id}/payments");
        let body = serde_json::to_value(PaymentRequest {
            amount,
            payment_date,
        })
        .map_err(|e| ConnectorError::invalid_response(e.to_string()))?;
        let response = self.send(Method::POST, &path, &[], Some(body)).await?;
        Self::expect_success(response, &path).await?;
        Ok(())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout {
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    } else {
        ConnectorError::connection_failed_with_source("target request failed", e)
    }
}
