//! Rule update API.
//!
//! Accepts a JSON array of backend server rules on `POST /rules` and writes
//! each one into the forward table, in request order.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::map_controller::{MapController, PinnedTables, TableSource};

/// Controller shared between request handlers.
pub type SharedController<S = PinnedTables> = Arc<Mutex<MapController<S>>>;

// ---------------------------------------------------------------------------
// Wire Types
// ---------------------------------------------------------------------------

/// A backend server an operator wants a token redirected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServerRule {
    pub token: String,
    #[serde(rename = "gsaddress")]
    pub gs_address: String,
    #[serde(rename = "gsport")]
    pub gs_port: String,
}

/// Body of every response, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Rule Application
// ---------------------------------------------------------------------------

/// Insert each rule in order, stopping at the first failure.
///
/// Rules before the failing one stay in the table. The lock is taken per
/// rule, so concurrent callers may interleave between entries.
pub async fn apply_rules<S: TableSource>(
    controller: &Mutex<MapController<S>>,
    rules: &[BackendServerRule],
) -> Result<()> {
    for (index, rule) in rules.iter().enumerate() {
        let result = controller
            .lock()
            .await
            .insert(&rule.gs_address, &rule.gs_port, &rule.token);

        if let Err(e) = result {
            return Err(Error::RuleRejected {
                index,
                token: rule.token.clone(),
                source: Box::new(e),
            });
        }

        debug!(
            index,
            token = %rule.token,
            address = %rule.gs_address,
            port = %rule.gs_port,
            "applied backend server rule"
        );
    }

    info!(rules = rules.len(), "backend server rules applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

pub fn router<S: TableSource>(controller: SharedController<S>) -> Router {
    Router::new()
        .route("/rules", post(update_rules::<S>))
        .with_state(controller)
}

/// Serve the rule API on `bind` until `shutdown` resolves or the listener fails.
pub async fn serve<S, F>(
    bind: SocketAddr,
    controller: SharedController<S>,
    shutdown: F,
) -> anyhow::Result<()>
where
    S: TableSource,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(controller);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding rule API to {}", bind))?;

    info!(bind = %bind, "rule API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("rule API server error")?;

    Ok(())
}

async fn update_rules<S: TableSource>(
    State(controller): State<SharedController<S>>,
    body: Bytes,
) -> Response {
    let rules: Vec<BackendServerRule> = match serde_json::from_slice(&body) {
        Ok(rules) => rules,
        Err(e) => return Error::BadRequest(e.to_string()).into_response(),
    };

    match apply_rules(&*controller, &rules).await {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "ok".to_string(),
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        error!(error = %self, "/rules processing error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(MessageResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
