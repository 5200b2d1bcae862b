//! Status API — a small read-only HTTP surface over the store.

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tracing::{error, info};

use crate::engine::types::EmailRecord;
use crate::store::EmailStore;

/// How many emails `/emails` returns at most.
const EMAIL_LIST_LIMIT: usize = 50;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ApiContext {
    pub store: Arc<dyn EmailStore>,
    pub db_path: String,
    pub rules_file: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    total_emails: u64,
    unread_emails: u64,
    database: String,
    rules_file: String,
}

#[derive(Debug, Serialize)]
struct EmailsResponse {
    emails: Vec<EmailRecord>,
    total_count: u64,
}

/// Build the API router.
pub fn routes(ctx: ApiContext) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/emails", get(list_emails))
        .with_state(ctx)
}

/// Bind and serve the API until the process exits.
pub async fn serve(ctx: ApiContext, port: u16) -> std::io::Result<()> {
    let app = routes(ctx);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "Status API started");
    axum::serve(listener, app).await
}

async fn index(State(ctx): State<ApiContext>) -> Result<Json<StatusResponse>, StatusCode> {
    let total_emails = ctx.store.email_count().await.map_err(internal)?;
    let unread_emails = ctx.store.unread_count().await.map_err(internal)?;
    Ok(Json(StatusResponse {
        status: "mailrules running",
        total_emails,
        unread_emails,
        database: ctx.db_path.clone(),
        rules_file: ctx.rules_file.clone(),
    }))
}

async fn list_emails(State(ctx): State<ApiContext>) -> Result<Json<EmailsResponse>, StatusCode> {
    let emails = ctx
        .store
        .get_emails(Some(EMAIL_LIST_LIMIT), 0)
        .await
        .map_err(internal)?;
    let total_count = ctx.store.email_count().await.map_err(internal)?;
    Ok(Json(EmailsResponse {
        emails,
        total_count,
    }))
}

fn internal(e: crate::error::DatabaseError) -> StatusCode {
    error!(error = %e, "Store query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
