//! HTTP client for the payment provider's checkout API.
//!
//! Transport failures, timeouts, 429 and 5xx answers are reported as
//! `ProviderError::Unavailable` so the engine retries them; any other
//! non-success answer is a rejection.

use std::time::Duration;

use async_trait::async_trait;
use domain::models::{CheckoutRequest, CheckoutSession, SessionPaymentStatus, SessionState, SessionStatus};
use domain::services::{PaymentProvider, ProviderError};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PaymentConfig;

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    amount: i64,
    currency: &'a str,
    description: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    client_reference_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    id: String,
    #[serde(default)]
    url: Option<String>,
    payment_status: SessionPaymentStatus,
    status: SessionState,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    session_id: &'a str,
    amount: i64,
    reason: &'a str,
}

/// Payment provider reached over HTTPS with a bearer API key.
#[derive(Debug, Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(config: &PaymentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turns a non-success answer into the matching provider error.
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Payment provider returned an error");
        Err(classify_status(status, body))
    }
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::Unavailable(format!("{}: {}", status, body))
    } else {
        ProviderError::Rejected(format!("{}: {}", status, body))
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Unavailable("request timed out".to_string())
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

fn decode_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Rejected(format!("unexpected provider response: {}", err))
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let body = CreateSessionBody {
            amount: request.amount_cents,
            currency: &request.currency,
            description: &request.description,
            success_url: &request.success_url,
            cancel_url: &request.cancel_url,
            client_reference_id: request.booking_id.to_string(),
        };

        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let session: SessionBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        let redirect_url = session.url.ok_or_else(|| {
            ProviderError::Rejected("checkout session has no redirect url".to_string())
        })?;

        debug!(session_ref = %session.id, "Checkout session created");
        Ok(CheckoutSession {
            session_ref: session.id,
            redirect_url,
        })
    }

    async fn get_session_status(&self, session_ref: &str) -> Result<SessionStatus, ProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_ref)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let session: SessionBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(decode_error)?;

        Ok(SessionStatus {
            payment_status: session.payment_status,
            status: session.status,
        })
    }

    async fn refund(
        &self,
        session_ref: &str,
        percent: i16,
        amount_cents: i64,
    ) -> Result<(), ProviderError> {
        let body = RefundBody {
            session_id: session_ref,
            amount: amount_cents,
            reason: "requested_by_customer",
        };

        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        Self::check(response).await?;
        debug!(session_ref = %session_ref, percent, amount_cents, "Refund accepted");
        Ok(())
    }
}
