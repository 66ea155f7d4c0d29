//! Helpers for router and service unit tests

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::{
    config::AppConfig,
    repository::Repository,
    services::{email::EmailService, Services},
    AppState,
};

/// State backed by a pool that never connects unless a query runs
pub fn state() -> AppState {
    state_with(AppConfig::default())
}

pub fn state_with(config: AppConfig) -> AppState {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect_lazy(&config.database.url)
        .expect("database url parses");

    let email = EmailService::from_config(&config.email, &config.app.frontend_url);
    let services = Services::new(Repository::new(pool), &config, email);

    AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    }
}
