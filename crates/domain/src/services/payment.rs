//! Payment polling policy and mock payment provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{CheckoutRequest, CheckoutSession, SessionStatus};
use crate::services::ports::{PaymentProvider, ProviderError};

/// Bounds for polling a payment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total status queries per reconciliation, at least 1.
    pub max_attempts: u32,
    /// Delay between queries while the session is still open.
    pub interval: Duration,
    /// Ceiling for the backoff applied after provider failures.
    pub max_backoff: Duration,
    /// Timeout for a single status query.
    pub request_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_millis(2_000),
            max_backoff: Duration::from_secs(16),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    /// A single query, no waiting. Used for client-driven status polling.
    pub fn single(request_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
            max_backoff: Duration::ZERO,
            request_timeout,
        }
    }

    /// Delay before the next query after `failures` consecutive provider
    /// failures, doubling from `interval` up to `max_backoff`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.interval.saturating_mul(factor).min(self.max_backoff.max(self.interval))
    }
}

#[derive(Debug, Clone)]
struct MockSession {
    status: SessionStatus,
    amount_cents: i64,
}

/// A refund accepted by the mock provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRefund {
    pub session_ref: String,
    pub percent: i16,
    pub amount_cents: i64,
}

/// Mock payment provider for development and testing.
///
/// Sessions start open; tests drive them with `set_session_status`.
#[derive(Debug)]
pub struct MockPaymentProvider {
    checkout_base_url: String,
    sessions: Mutex<HashMap<String, MockSession>>,
    refunds: Mutex<Vec<MockRefund>>,
    unavailable: AtomicBool,
    refunds_unavailable: AtomicBool,
    fail_next_status_calls: AtomicU32,
    status_calls: AtomicU32,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self::new("https://checkout.mock.local")
    }
}

impl MockPaymentProvider {
    pub fn new(checkout_base_url: impl Into<String>) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into(),
            sessions: Mutex::new(HashMap::new()),
            refunds: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            refunds_unavailable: AtomicBool::new(false),
            fail_next_status_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
        }
    }

    /// A provider whose every call fails as unavailable.
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.set_unavailable(true);
        provider
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_refunds_unavailable(&self, unavailable: bool) {
        self.refunds_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` status queries fail as unavailable.
    pub fn fail_next_status_calls(&self, count: u32) {
        self.fail_next_status_calls.store(count, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Sets the provider-side state of a session, creating it if needed.
    pub async fn set_session_status(&self, session_ref: &str, status: SessionStatus) {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session_ref.to_string())
            .and_modify(|s| s.status = status)
            .or_insert(MockSession {
                status,
                amount_cents: 0,
            });
    }

    pub async fn session_amount(&self, session_ref: &str) -> Option<i64> {
        self.sessions
            .lock()
            .await
            .get(session_ref)
            .map(|s| s.amount_cents)
    }

    pub async fn issued_refunds(&self) -> Vec<MockRefund> {
        self.refunds.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            tracing::warn!("Mock payment provider simulating outage");
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        self.check_available()?;

        let session_ref = format!("cs_mock_{}", Uuid::new_v4().simple());
        self.sessions.lock().await.insert(
            session_ref.clone(),
            MockSession {
                status: SessionStatus::open(),
                amount_cents: request.amount_cents,
            },
        );

        tracing::info!(
            booking_id = %request.booking_id,
            session_ref = %session_ref,
            amount_cents = request.amount_cents,
            "Mock: opened checkout session"
        );

        Ok(CheckoutSession {
            redirect_url: format!("{}/pay/{}", self.checkout_base_url, session_ref),
            session_ref,
        })
    }

    async fn get_session_status(&self, session_ref: &str) -> Result<SessionStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let injected = self
            .fail_next_status_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(ProviderError::Unavailable("injected failure".to_string()));
        }

        self.sessions
            .lock()
            .await
            .get(session_ref)
            .map(|s| s.status)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown session {}", session_ref)))
    }

    async fn refund(
        &self,
        session_ref: &str,
        percent: i16,
        amount_cents: i64,
    ) -> Result<(), ProviderError> {
        self.check_available()?;
        if self.refunds_unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("refunds unavailable".to_string()));
        }

        self.refunds.lock().await.push(MockRefund {
            session_ref: session_ref.to_string(),
            percent,
            amount_cents,
        });
        tracing::info!(
            session_ref = %session_ref,
            percent,
            amount_cents,
            "Mock: refund issued"
        );
        Ok(())
    }
}
