//! Admin HTTP endpoints for schema verification and repair.
//!
//! Every request re-reads the live catalog; nothing is cached between
//! requests. The database handle is owned by [`AppState`] and shared by
//! reference with each request's auditor or remediator.

mod catch_panic;
mod error;
mod handlers;
mod request_tracing;

pub use error::ApiError;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use muster::{Channel, RuleSet};
use muster_config::Config;
use std::sync::Arc;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub channel: Arc<dyn Channel>,
    pub rules: RuleSet,
    /// Postgres schema holding the application's tables.
    pub schema: Arc<str>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(channel: Arc<dyn Channel>, rules: RuleSet) -> Self {
        Self::with_config(channel, rules, &Config::default())
    }

    pub fn with_config(channel: Arc<dyn Channel>, rules: RuleSet, config: &Config) -> Self {
        Self {
            channel,
            rules,
            schema: Arc::from(config.database.schema.as_str()),
            max_body_bytes: config.server.max_body_bytes,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/admin/schema/verify", get(handlers::verify))
        .route("/api/admin/schema/fix-all", post(handlers::fix_all))
        .route("/api/admin/schema/fix-table", post(handlers::fix_table))
        .route("/api/admin/schema/custom-fix", post(handlers::custom_fix))
        .route("/api/admin/schema/rules", get(handlers::rules))
        .fallback(handlers::not_found)
        .layer(from_fn(catch_panic::catch_panic_middleware))
        .layer(from_fn(request_tracing::request_tracing_middleware))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}
