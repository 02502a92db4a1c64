//! LendLedger backend server
//!
//! Loan lifecycle and repayment engine: borrowers apply and repay, operators
//! review, disburse, verify manual proofs, and refund; every state change is
//! durable, audited, and pushed to live subscribers.

use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use lendledger_server::audit::AuditService;
use lendledger_server::auth::AuthService;
use lendledger_server::config::Config;
use lendledger_server::credit::{CreditService, HeuristicScorer};
use lendledger_server::crypto::FieldCipher;
use lendledger_server::idempotency::IdempotencyService;
use lendledger_server::loans::{DisbursementService, LoanService};
use lendledger_server::middleware;
use lendledger_server::notifications::NotificationService;
use lendledger_server::payments::{RefundService, RepaymentEngine};
use lendledger_server::provider::{HttpPaymentProvider, PaymentProvider, SimulatedProvider};
use lendledger_server::routes;
use lendledger_server::state::AppState;
use lendledger_server::websocket;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!("Connecting to {}", config.database_url_masked());
    let db_pool = match PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Database connection failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&db_pool).await {
        tracing::error!("Migrations failed: {}", e);
        std::process::exit(1);
    }
    tracing::info!("Database ready, migrations applied");

    // Provider: HTTP when configured, simulated otherwise
    let provider: Arc<dyn PaymentProvider> = match &config.provider_url {
        Some(url) => {
            let timeout = Duration::from_secs(config.provider_timeout_seconds);
            match HttpPaymentProvider::new(url.clone(), timeout) {
                Ok(p) => {
                    tracing::info!(provider_url = %url, "Using HTTP payment provider");
                    Arc::new(p)
                }
                Err(e) => {
                    tracing::error!("Provider client setup failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            tracing::warn!("PROVIDER_URL not set; using the simulated payment provider");
            Arc::new(SimulatedProvider::new())
        }
    };

    let ws_state = websocket::WsState::new(config.jwt_secret.clone());
    let cipher = FieldCipher::new(config.encryption_key);

    let audit_service = AuditService::new(db_pool.clone());
    let notification_service = NotificationService::new(db_pool.clone(), ws_state.clone());
    let idempotency = IdempotencyService::new(db_pool.clone());

    let auth_service = Arc::new(AuthService::new(
        db_pool.clone(),
        config.jwt_secret.clone(),
        config.operator_secret.clone(),
        config.jwt_access_token_ttl_seconds,
        config.jwt_refresh_token_ttl_days,
        cipher,
    ));

    let loan_service = Arc::new(LoanService::new(
        db_pool.clone(),
        audit_service.clone(),
        notification_service.clone(),
    ));
    let disbursement_service = Arc::new(DisbursementService::new(
        db_pool.clone(),
        provider.clone(),
        audit_service.clone(),
        notification_service.clone(),
    ));
    let repayment_engine = Arc::new(RepaymentEngine::new(
        db_pool.clone(),
        provider.clone(),
        audit_service.clone(),
        notification_service.clone(),
    ));
    let refund_service = Arc::new(RefundService::new(
        db_pool.clone(),
        provider,
        audit_service.clone(),
        notification_service.clone(),
    ));
    let credit_service = Arc::new(CreditService::new(
        db_pool.clone(),
        Arc::new(HeuristicScorer),
    ));

    let app_state = AppState {
        auth_service,
        loan_service,
        disbursement_service,
        repayment_engine,
        refund_service,
        notification_service: Arc::new(notification_service),
        credit_service,
        audit_service: Arc::new(audit_service),
        idempotency: Arc::new(idempotency),
        ws_state,
    };

    // Hourly sweep of expired idempotency records
    let sweeper = app_state.idempotency.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match sweeper.purge_expired().await {
                Ok(purged) if purged > 0 => {
                    tracing::info!(purged, "Purged expired idempotency records");
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Idempotency sweep failed: {}", e),
            }
        }
    });

    let health_db_pool = db_pool.clone();

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(move || health_check(health_db_pool.clone())))
        .route("/ws", get(websocket::ws_handler))
        .merge(routes::auth_routes())
        .merge(routes::loan_routes())
        .merge(routes::payment_routes())
        .merge(routes::notification_routes())
        .merge(routes::credit_routes())
        .merge(routes::admin_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("WebSocket available at ws://{}/ws", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    tracing::info!("Server shutdown complete");
}

async fn root() -> &'static str {
    "LendLedger API Server"
}

/// Health check response
#[derive(serde::Serialize)]
struct HealthResponse {
    status: String,
    database: String,
    version: String,
}

/// Health check endpoint
async fn health_check(pool: sqlx::PgPool) -> axum::Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let status = if database == "connected" {
        "healthy"
    } else {
        "unhealthy"
    };

    axum::Json(HealthResponse {
        status: status.to_string(),
        database,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed = allowed_origins.unwrap_or_default();

    if allowed.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
