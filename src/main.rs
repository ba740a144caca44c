mod app;
mod config;
mod db;
mod engine;
mod error;
mod flows;
mod gateway;
mod intent;
mod meals;
mod reports;
mod router;
#[cfg(test)]
mod scenarios;
mod scheduler;
mod services;
mod sessions;
mod state;
mod text;
mod users;
mod webhook;

use crate::config::AppConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "coachbot=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let app_state = AppState::init(&config).await?;

    if let Some(db) = &app_state.db {
        db::migrate(db).await;
    } else {
        tracing::warn!("no DATABASE_URL or SESSION_STORE=memory; sessions live in memory");
    }

    app::serve(app::build_app(app_state)).await
}
