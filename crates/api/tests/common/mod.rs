//! Common test utilities for integration tests.
//!
//! The app runs on the in-memory store with the mock payment provider, so
//! these tests need no database or network.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use domain::services::{BookingEngine, InMemoryStore, MockPaymentProvider};
use fake::{faker::lorem::en::Words, Fake};
use serde_json::{json, Value};
use shared::jwt::{JwtConfig, Role};
use skimonitor_api::app::{create_app, AppState};
use skimonitor_api::config::{
    BookingConfig, Config, DatabaseConfig, IdentityConfig, JobsConfig, LoggingConfig,
    PaymentConfig, PaymentProviderKind, SecurityConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TOKEN_SECRET: &str = "integration-test-secret-0123456789";
pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const ORIGIN: &str = "https://app.skimonitor.test";

/// Test configuration: memory storage, mock provider, UTC schedule.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            cors_origins: vec![],
        },
        identity: IdentityConfig {
            public_key: String::new(),
            token_secret: TOKEN_SECRET.to_string(),
            leeway_secs: 0,
        },
        payment: PaymentConfig {
            provider: PaymentProviderKind::Mock,
            base_url: String::new(),
            api_key: String::new(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            currency: "eur".to_string(),
            request_timeout_ms: 1_000,
            poll_max_attempts: 2,
            poll_interval_ms: 1,
            poll_max_backoff_ms: 2,
            success_path: "/payment-success".to_string(),
            cancel_path: "/booking-cancelled".to_string(),
        },
        booking: BookingConfig {
            max_occurrences_per_template: 52,
            commission_rate_bps: 1000,
            schedule_utc_offset_minutes: 0,
            reminder_window_hours: 24,
        },
        jobs: JobsConfig {
            enabled: false,
            ..Default::default()
        },
    }
}

/// A running app plus handles on its collaborators.
pub struct TestApp {
    pub router: Router,
    pub engine: Arc<BookingEngine>,
    pub provider: Arc<MockPaymentProvider>,
    jwt: JwtConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockPaymentProvider::default());
        let engine = Arc::new(BookingEngine::new(
            store.clone(),
            store.clone(),
            store,
            provider.clone(),
            config.engine_settings(),
        ));
        let jwt = config.jwt_config().unwrap();
        let state = AppState::new(config, engine.clone(), None).unwrap();

        Self {
            router: create_app(state),
            engine,
            provider,
            jwt,
        }
    }

    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        self.jwt.issue_token(user_id, role, 3600).unwrap()
    }

    /// Sends a request and returns the status with the parsed JSON body.
    pub async fn send(&self, request: Request<Body>) -> (axum::http::StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, parse_response_body(response).await)
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

/// A user with a signed token.
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestUser {
    pub fn new(app: &TestApp, role: Role) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            token: app.token(id, role),
        }
    }
}

pub fn lesson_title() -> String {
    let words: Vec<String> = Words(2..4).fake();
    words.join(" ")
}

/// A lesson date safely in the future.
pub fn future_date(days: i64) -> NaiveDate {
    (Utc::now() + Duration::days(days)).date_naive()
}

pub fn group_lesson_body(date: NaiveDate, capacity: i32) -> Value {
    json!({
        "lesson_type": "group",
        "title": lesson_title(),
        "description": "Carving and short turns",
        "date": date,
        "start_time": "10:00",
        "end_time": "12:00",
        "max_participants": capacity,
        "price_cents": 5000
    })
}

/// Creates one group lesson as `instructor` and returns its JSON.
pub async fn create_group_lesson(
    app: &TestApp,
    instructor: &TestUser,
    date: NaiveDate,
    capacity: i32,
) -> Value {
    let (status, body) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/lessons",
            group_lesson_body(date, capacity),
            &instructor.token,
        ))
        .await;
    assert_eq!(status, axum::http::StatusCode::CREATED, "{}", body);
    body["lessons"][0].clone()
}

/// Books `participants` seats as `client` and returns the booking JSON.
pub async fn create_booking(
    app: &TestApp,
    client: &TestUser,
    lesson_id: &str,
    participants: i32,
) -> Value {
    let (status, body) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/bookings",
            json!({ "lesson_id": lesson_id, "participants": participants }),
            &client.token,
        ))
        .await;
    assert_eq!(status, axum::http::StatusCode::CREATED, "{}", body);
    body
}

/// Opens a checkout for the booking and returns the session id.
pub async fn start_checkout(app: &TestApp, client: &TestUser, booking_id: &str) -> String {
    let (status, body) = app
        .send(json_request_with_auth(
            Method::POST,
            "/api/v1/payments/checkout",
            json!({ "booking_id": booking_id, "origin_url": ORIGIN }),
            &client.token,
        ))
        .await;
    assert_eq!(status, axum::http::StatusCode::OK, "{}", body);
    body["session_id"].as_str().unwrap().to_string()
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn json_request_with_auth(method: Method, uri: &str, body: Value, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn get_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn delete_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(Value::Null)
}
