use std::{sync::Arc, time::Duration};

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

use crate::{
    config::ApiConfig,
    payment::{PaymentError, PaymentProvider, StripeProvider},
    purchase::mapping::ProductMappings,
};

pub type AppState = Arc<State>;

pub struct State {
    pub config: ApiConfig,
    pub db: DatabaseConnection,
    /// `None` when no Stripe key is configured; payment routes answer 503 then.
    pub payments: Option<Arc<dyn PaymentProvider>>,
    pub mappings: ProductMappings,
}

impl State {
    pub async fn new(config: ApiConfig) -> Result<Self, DbErr> {
        let mut opt = ConnectOptions::new(config.database_url.to_owned());
        opt.max_connections(config.db_max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;

        let payments = match config.stripe_secret_key.as_deref() {
            Some(key) => {
                if config.stripe_webhook_secret.is_none() {
                    tracing::warn!("STRIPE_WEBHOOK_SECRET not set, webhooks will be rejected");
                }
                let provider = StripeProvider::new(key, config.stripe_webhook_secret.clone());
                Some(Arc::new(provider) as Arc<dyn PaymentProvider>)
            }
            None => {
                tracing::warn!("STRIPE_SECRET_KEY not set, checkout routes are disabled");
                None
            }
        };

        Ok(Self::from_parts(config, db, payments))
    }

    pub fn from_parts(
        config: ApiConfig,
        db: DatabaseConnection,
        payments: Option<Arc<dyn PaymentProvider>>,
    ) -> Self {
        let mappings = ProductMappings::new(config.mapping_cache_ttl);
        Self {
            config,
            db,
            payments,
            mappings,
        }
    }

    pub fn payments(&self) -> Result<&dyn PaymentProvider, PaymentError> {
        self.payments.as_deref().ok_or(PaymentError::NotConfigured)
    }
}
