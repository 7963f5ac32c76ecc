use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tireline_core::audit::TracingAuditSink;
use tireline_core::auth::SessionSigner;
use tireline_core::clock::SystemClock;
use tireline_core::config::{
    AppConfig, ConfigError, LoadOptions, NotificationConfig, NotificationProvider,
};
use tireline_core::intake::IntakeDefaults;
use tireline_core::notify::{DispatchError, LogDispatcher, NotificationDispatcher};
use tireline_core::pricing::{FixedRatePricingEngine, PricingPolicy};
use tireline_db::repositories::SqlQuoteRepository;
use tireline_db::{connect_with_config, migrations, DbPool};
use tracing::info;

use crate::mailer::{HttpEmailDispatcher, QuoteMailer};
use crate::routes::AppState;
use crate::service::QuoteService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification provider setup failed: {0}")]
    Notification(#[source] DispatchError),
    #[error("e-mail templates failed to load: {0}")]
    Templates(#[source] tera::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let dispatcher = build_dispatcher(&config.notifications)?;
    let mailer = QuoteMailer::new(dispatcher).map_err(BootstrapError::Templates)?;
    info!(
        event_name = "system.bootstrap.notifications_ready",
        correlation_id = "bootstrap",
        provider = mailer.provider(),
        "notification provider configured"
    );

    let pricing = FixedRatePricingEngine::new(PricingPolicy {
        tax_rate: config.quotes.tax_rate,
        currency: config.quotes.currency.clone(),
    });
    let service = QuoteService::new(
        Arc::new(SqlQuoteRepository::new(db_pool.clone())),
        Arc::new(pricing),
        mailer,
        Arc::new(TracingAuditSink),
        Arc::new(SystemClock),
        IntakeDefaults { valid_days: config.quotes.default_valid_days },
    );
    let signer =
        SessionSigner::new(config.auth.session_secret.clone(), config.auth.session_ttl_hours);

    Ok(Application {
        state: AppState { service: Arc::new(service), signer: Arc::new(signer) },
        db_pool,
        config,
    })
}

pub fn build_dispatcher(
    config: &NotificationConfig,
) -> Result<Arc<dyn NotificationDispatcher>, BootstrapError> {
    match config.provider {
        NotificationProvider::Log => Ok(Arc::new(LogDispatcher)),
        NotificationProvider::Http => {
            let (Some(endpoint), Some(api_key)) = (&config.endpoint, &config.api_key) else {
                return Err(ConfigError::Validation(
                    "notifications.endpoint and notifications.api_key are required for `http`"
                        .to_string(),
                )
                .into());
            };
            let dispatcher = HttpEmailDispatcher::new(
                endpoint.clone(),
                api_key.clone(),
                config.from_address.clone(),
                Duration::from_secs(config.timeout_secs),
            )
            .map_err(BootstrapError::Notification)?;
            Ok(Arc::new(dispatcher))
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use tireline_core::config::{
        AppConfig, ConfigOverrides, LoadOptions, NotificationConfig, NotificationProvider,
    };
    use tireline_core::intake::{ItemInput, NewQuoteInput};
    use tireline_core::listing::QuoteQuery;
    use tireline_core::notify::NotificationDispatcher;

    use super::{bootstrap, build_dispatcher};
    use crate::service::RequestContext;

    fn valid_options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                session_secret: Some("0123456789abcdef0123456789abcdef".to_string()),
                notification_provider: Some(NotificationProvider::Log),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_session_secret() {
        let mut options = valid_options("sqlite::memory:");
        options.overrides.session_secret = Some(String::new());

        let result = bootstrap(options).await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("auth.session_secret"));
    }

    #[tokio::test]
    async fn integration_smoke_creates_and_lists_through_sqlite() {
        let app = bootstrap(valid_options("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('quote', 'quote_item', 'quote_status_event')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables after bootstrap");
        assert_eq!(table_count, 3);

        let input = NewQuoteInput {
            customer_name: "Smoke Test".to_string(),
            customer_email: "smoke@example.com".to_string(),
            items: vec![ItemInput {
                name: "Tire A".to_string(),
                quantity: 4,
                unit_price: Decimal::new(50, 0),
                ..ItemInput::default()
            }],
            send_immediately: true,
            ..NewQuoteInput::default()
        };
        let ctx = RequestContext::new("smoke", "admin:smoke");
        let created = app.state.service.create(&ctx, input).await.expect("create");
        assert!(created.notification.is_some_and(|outcome| outcome.is_delivered()));

        let page = app.state.service.list(&QuoteQuery::default()).await.expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.quotes[0].total_amount, Decimal::new(24200, 2));

        app.db_pool.close().await;
    }

    #[test]
    fn http_provider_needs_endpoint_and_key() {
        let mut config: NotificationConfig = AppConfig::default().notifications;
        config.provider = NotificationProvider::Http;

        assert!(build_dispatcher(&config).is_err());

        config.endpoint = Some("https://mail.example.com/v1/emails".to_string());
        config.api_key = Some("key".to_string().into());
        let dispatcher = build_dispatcher(&config).expect("http dispatcher");
        assert_eq!(dispatcher.name(), "http");
    }
}
