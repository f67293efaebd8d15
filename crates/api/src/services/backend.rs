//! Builds the booking engine on the configured storage backend.

use std::sync::Arc;

use domain::services::{
    BookingEngine, BookingStore, InMemoryStore, LessonStore, MockPaymentProvider, PaymentProvider,
    RefundStore,
};
use persistence::{BookingRepository, LessonRepository, RefundRepository};
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, PaymentProviderKind, StorageBackend};
use crate::services::HttpPaymentProvider;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payment client could not be built: {0}")]
    PaymentClient(#[from] reqwest::Error),
}

/// The engine plus the pool backing it, if any.
pub struct Backend {
    pub engine: Arc<BookingEngine>,
    pub pool: Option<PgPool>,
}

fn payment_provider(config: &Config) -> Result<Arc<dyn PaymentProvider>, StartupError> {
    Ok(match config.payment.provider {
        PaymentProviderKind::Http => Arc::new(HttpPaymentProvider::new(&config.payment)?),
        PaymentProviderKind::Mock => {
            warn!("Using the mock payment provider, no real payments will be taken");
            if config.payment.base_url.is_empty() {
                Arc::new(MockPaymentProvider::default())
            } else {
                Arc::new(MockPaymentProvider::new(config.payment.base_url.clone()))
            }
        }
    })
}

/// Connects storage and the payment provider and builds the engine.
pub async fn build_backend(config: &Config) -> Result<Backend, StartupError> {
    let payments = payment_provider(config)?;
    let settings = config.engine_settings();

    match config.storage.backend {
        StorageBackend::Postgres => {
            let db_config: persistence::db::DatabaseConfig = (&config.database).into();
            let pool = persistence::db::connect_and_migrate(&db_config).await?;
            let lessons: Arc<dyn LessonStore> = Arc::new(LessonRepository::new(pool.clone()));
            let bookings: Arc<dyn BookingStore> = Arc::new(BookingRepository::new(pool.clone()));
            let refunds: Arc<dyn RefundStore> = Arc::new(RefundRepository::new(pool.clone()));

            info!("Booking engine running on PostgreSQL");
            Ok(Backend {
                engine: Arc::new(BookingEngine::new(lessons, bookings, refunds, payments, settings)),
                pool: Some(pool),
            })
        }
        StorageBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            warn!("Booking engine running on the in-memory store, state is lost on restart");
            Ok(Backend {
                engine: Arc::new(BookingEngine::new(
                    store.clone(),
                    store.clone(),
                    store,
                    payments,
                    settings,
                )),
                pool: None,
            })
        }
    }
}
