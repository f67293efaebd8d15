use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use domain::services::BookingEngine;
use shared::jwt::{JwtConfig, JwtError};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{
    metrics_handler, metrics_middleware, require_admin, require_user_auth, trace_id,
};
use crate::routes::{admin, bookings, health, lessons, payments};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    /// Present only on the PostgreSQL backend.
    pub pool: Option<PgPool>,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtConfig>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: Arc<BookingEngine>,
        pool: Option<PgPool>,
    ) -> Result<Self, JwtError> {
        let jwt = config.jwt_config()?;
        Ok(Self {
            engine,
            pool,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Development default
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Browsing is public; writing handlers authenticate through `UserAuth`
    let lesson_routes = Router::new()
        .route(
            "/api/v1/lessons",
            get(lessons::list_lessons).post(lessons::create_lessons),
        )
        .route(
            "/api/v1/lessons/:lesson_id",
            get(lessons::get_lesson).delete(lessons::cancel_lesson),
        );

    // Any authenticated principal; handlers enforce ownership and roles
    let protected_routes = Router::new()
        .route("/api/v1/lessons/preview", post(lessons::preview_lessons))
        .route("/api/v1/my-lessons", get(lessons::list_my_lessons))
        .route(
            "/api/v1/bookings",
            post(bookings::create_booking).get(bookings::list_my_bookings),
        )
        .route(
            "/api/v1/bookings/:booking_id",
            get(bookings::get_booking).delete(bookings::cancel_booking),
        )
        .route("/api/v1/payments/checkout", post(payments::start_checkout))
        .route(
            "/api/v1/payments/status/:session_ref",
            get(payments::payment_status),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_auth,
        ));

    let admin_routes = Router::new()
        .route("/api/v1/admin/stats", get(admin::platform_stats))
        .route("/api/v1/admin/revenue", get(admin::revenue_stats))
        .route("/api/v1/admin/reminders", get(admin::upcoming_reminders))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    // The webhook authenticates by signature
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/api/health/ready", get(health::ready))
        .route("/api/v1/payments/webhook", post(payments::provider_webhook))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(lesson_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors_layer(&config.security.cors_origins))
        .with_state(state)
}
