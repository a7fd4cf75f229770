mod auth;
mod config;
mod error;
mod models;
mod payments;
mod relay;
mod routes;
mod slots;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use config::Config;
use payments::gateway::PaymentGateway;
use relay::Relay;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub relay: Relay,
    pub gateway: PaymentGateway,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_ok: bool = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .map(|v| v == 1)
        .unwrap_or(false);
    Json(serde_json::json!({ "status": "ok", "db": db_ok }))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env());

    let db = PgPool::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!()
        .run(&db)
        .await
        .expect("failed to run migrations");

    let gateway = PaymentGateway::new(&config.payment_api_url, &config.payment_secret_key);

    let state = AppState {
        db,
        config: config.clone(),
        relay: Relay::new(),
        gateway,
    };

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/ws", get(relay::ws::relay_ws))
        .merge(routes::api_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
