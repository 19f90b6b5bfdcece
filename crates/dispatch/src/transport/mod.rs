// SPDX-License-Identifier: BUSL-1.1

//! HTTP transport for the dispatch server: the printer-facing protocol, the
//! intake endpoint, and the read-only query surface.

pub mod http;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with every dispatch route.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Printer protocol — three verbs, one path (§4.F).
        .route("/cloudprnt", post(http::poll).get(http::fetch).delete(http::confirm))
        // Intake.
        .route("/api/print", post(http::intake))
        // Query surface (§4.G).
        .route("/api/printers", get(http::printers))
        .route("/api/printers/online", get(http::printers_online))
        .route("/api/printers/{serial}/history", get(http::printer_history))
        .route("/api/tenants/{tenant}/queue", get(http::tenant_queue))
        .route("/api/presence", get(http::presence))
        // Administrative.
        .route("/api/config/reload", post(http::config_reload))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
