// SPDX-License-Identifier: BUSL-1.1

//! HTTP handlers for the printer-facing dispatch protocol (§4.F), the
//! intake endpoint, and the read-only query surface (§4.G).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::audit::AuditEvent;
use crate::configsource::refresh_on_demand;
use crate::error::DispatchError;
use crate::jobstore::{ConfirmOutcome, FetchOutcome};
use crate::model::OrderMetadata;
use crate::render::RenderRequest;
use crate::state::AppState;

/// Header carrying the physical printer's serial on every poll (§6 point 1).
const SERIAL_HEADER: &str = "x-star-serial-number";
const ACCEPTED_MEDIA_TYPE: &str = "image/png";

// -- Printer protocol (`/cloudprnt`) ------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub job_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_types: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_method: Option<&'static str>,
}

impl PollResponse {
    fn idle() -> Self {
        Self { job_ready: false, job_token: None, media_types: None, delete_method: None }
    }

    fn offer(token: String) -> Self {
        Self {
            job_ready: true,
            job_token: Some(token),
            media_types: Some(vec![ACCEPTED_MEDIA_TYPE]),
            delete_method: Some("DELETE"),
        }
    }
}

/// `POST /cloudprnt` — a printer asking whether work is available.
pub async fn poll(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    let Some(serial) = headers.get(SERIAL_HEADER).and_then(|v| v.to_str().ok()) else {
        return DispatchError::BadRequest
            .to_http_response(format!("missing {SERIAL_HEADER} header"))
            .into_response();
    };
    let serial = serial.to_owned();

    // Unknown serials never create a presence record or mutate state (§4.F edge cases).
    if !state.registry.is_known(&serial).await {
        return Json(PollResponse::idle()).into_response();
    }

    state.presence.mark_seen(&serial, remote_addr(&headers)).await;

    let tenants = state.registry.tenants_for(&serial).await;
    for swept in state.jobs.sweep_tenants(&tenants, state.config.offer_timeout_ms, state.config.sent_timeout_ms).await
    {
        tracing::info!(token = %swept.token, tenant = %swept.tenant, from = swept.from, "poll-triggered sweep rewound job");
        state.audit.emit(AuditEvent::Requeued {
            tenant: swept.tenant,
            token: swept.token,
            reason: swept.from,
            timestamp: crate::audit::AuditSink::now(),
        });
    }

    match state.jobs.select_for_serial(&serial, &tenants).await {
        Some((job, first_offer)) => {
            if first_offer {
                // The intake endpoint couldn't attribute a `received` entry
                // to any serial — no serial was chosen yet. Backfill it now
                // that this job has its first serial, so the history window
                // for S1 reads {received, offered, ...} per §8 scenario 1.
                state
                    .history
                    .record(
                        &serial,
                        &job.tenant,
                        "received",
                        &job.token,
                        job.metadata.customer_name.clone(),
                        job.metadata.order_number.clone(),
                    )
                    .await;
            }
            state
                .history
                .record(
                    &serial,
                    &job.tenant,
                    "offered",
                    &job.token,
                    job.metadata.customer_name.clone(),
                    job.metadata.order_number.clone(),
                )
                .await;
            state.audit.emit(AuditEvent::Offered {
                serial,
                tenant: job.tenant,
                token: job.token.clone(),
                timestamp: crate::audit::AuditSink::now(),
            });
            Json(PollResponse::offer(job.token)).into_response()
        }
        None => Json(PollResponse::idle()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchQuery {
    pub token: String,
    #[serde(rename = "type")]
    pub media_type: String,
}

/// `GET /cloudprnt?token=...&type=...` — deliver raster bytes for an offered job.
pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FetchQuery>,
) -> impl IntoResponse {
    if query.media_type != ACCEPTED_MEDIA_TYPE {
        return DispatchError::UnsupportedMediaType
            .to_http_response(format!("unsupported media type {}", query.media_type))
            .into_response();
    }

    match state.jobs.fetch_content(&query.token).await {
        FetchOutcome::NotFound => {
            DispatchError::NotFound.to_http_response("unknown token").into_response()
        }
        FetchOutcome::Pending => Json(PollResponse::idle()).into_response(),
        FetchOutcome::Ready { bytes, tenant, serial, protocol_violation } => {
            if protocol_violation {
                tracing::warn!(token = %query.token, %tenant, "job fetched while still queued (offered skipped)");
            }
            if let Some(serial) = serial {
                state.history.record(&serial, &tenant, "sent", &query.token, None, None).await;
                state.audit.emit(AuditEvent::Sent {
                    serial,
                    tenant,
                    token: query.token.clone(),
                    timestamp: crate::audit::AuditSink::now(),
                });
            }
            (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, ACCEPTED_MEDIA_TYPE)],
                bytes.to_vec(),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub token: String,
    pub code: String,
}

/// Printer result codes: `"OK"`, `"200 OK"`, `"200"`, or anything starting
/// with `"2"` mean success; everything else is a failure (§6 point 3).
fn is_success_code(code: &str) -> bool {
    let upper = code.trim().to_uppercase();
    upper == "OK" || upper.starts_with('2')
}

/// `DELETE /cloudprnt?token=...&code=...` — confirm or reject a delivered job.
/// Always 200, including for unknown tokens (§4.F point 4).
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfirmQuery>,
) -> impl IntoResponse {
    let success = is_success_code(&query.code);
    match state.jobs.confirm(&query.token, success).await {
        ConfirmOutcome::UnknownTreatedSuccess => {}
        ConfirmOutcome::Done { tenant, serial } => {
            if let Some(serial) = serial.clone() {
                state.history.record(&serial, &tenant, "completed", &query.token, None, None).await;
            }
            state.audit.emit(AuditEvent::Completed {
                serial: serial.unwrap_or_default(),
                tenant,
                token: query.token.clone(),
                timestamp: crate::audit::AuditSink::now(),
            });
        }
        ConfirmOutcome::Requeued { tenant, serial } => {
            if let Some(serial) = serial {
                state.history.record(&serial, &tenant, "failed", &query.token, None, None).await;
            }
            state.audit.emit(AuditEvent::Failed {
                tenant,
                token: query.token.clone(),
                timestamp: crate::audit::AuditSink::now(),
            });
        }
    }
    StatusCode::OK
}

fn remote_addr(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("unknown")
}

// -- Intake (`/api/print`) -----------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TenantIds {
    One(String),
    Many(Vec<String>),
}

impl TenantIds {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    #[serde(rename = "restaurantId")]
    pub restaurant_id: TenantIds,
    pub order: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct IntakeResponse {
    pub ok: bool,
    pub tokens: Vec<String>,
}

fn order_metadata(order: &serde_json::Value) -> OrderMetadata {
    let text = |key: &str| order.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    OrderMetadata {
        customer_name: text("customerName"),
        order_number: text("orderNumber"),
        order_id: text("orderId"),
    }
}

/// `POST /api/print` — accept an order for one or more tenants.
pub async fn intake(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IntakeRequest>,
) -> impl IntoResponse {
    let tenants = req.restaurant_id.into_vec();
    if tenants.is_empty() {
        return DispatchError::BadRequest
            .to_http_response("restaurantId is required")
            .into_response();
    }

    // Opportunistically refresh (cache-throttled) so a tenant registered
    // moments ago isn't rejected against a stale snapshot (§4.H).
    refresh_on_demand(&state, state.config_source.as_ref(), false).await;

    let known: std::collections::HashSet<String> =
        state.registry.all_serials().await.into_iter().flat_map(|(_, ts)| ts).collect();
    let unknown: Vec<String> = tenants.iter().filter(|t| !known.contains(*t)).cloned().collect();
    if !unknown.is_empty() {
        return DispatchError::UnknownTenant
            .to_http_response(format!("Unknown restaurantId(s): {}", unknown.join(", ")))
            .into_response();
    }

    let metadata = order_metadata(&req.order);
    let mut tokens = Vec::with_capacity(tenants.len());
    for tenant in &tenants {
        let token = state.jobs.create(tenant, metadata.clone()).await;
        // No serial is known yet (§4.F point 1 is the first time a serial is
        // chosen); the `received` history entry is backfilled on first offer.
        state.audit.emit(AuditEvent::Received {
            serial: None,
            tenant: tenant.clone(),
            token: token.clone(),
            timestamp: crate::audit::AuditSink::now(),
        });
        tokens.push(token);
    }

    state.render.submit(
        Arc::clone(&state),
        RenderRequest { job_ids: tokens.clone(), metadata, order: req.order },
    );

    (StatusCode::ACCEPTED, Json(IntakeResponse { ok: true, tokens })).into_response()
}

// -- Query surface (`/api/...`) ------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PrinterStatus {
    pub serial: String,
    pub tenants: Vec<String>,
    pub online: bool,
    pub last_seen_ms: Option<u64>,
    pub age_ms: Option<u64>,
    pub address: Option<String>,
}

/// `GET /api/printers` — every configured serial, online or not.
pub async fn printers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let configured = state.registry.all_serials().await;
    let serials: Vec<String> = configured.iter().map(|(s, _)| s.clone()).collect();
    let snapshots = state.presence.all_configured_snapshot(&serials).await;
    let tenants_by_serial: std::collections::HashMap<String, Vec<String>> = configured.into_iter().collect();

    let out: Vec<PrinterStatus> = snapshots
        .into_iter()
        .map(|snap| PrinterStatus {
            tenants: tenants_by_serial.get(&snap.serial).cloned().unwrap_or_default(),
            serial: snap.serial,
            online: snap.online,
            last_seen_ms: snap.last_seen,
            age_ms: snap.age_ms,
            address: snap.address,
        })
        .collect();
    Json(out)
}

/// `GET /api/printers/online` — online-only subset, most-recent first.
pub async fn printers_online(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let configured = state.registry.all_serials().await;
    let tenants_by_serial: std::collections::HashMap<String, Vec<String>> = configured.into_iter().collect();
    let out: Vec<PrinterStatus> = state
        .presence
        .online_snapshot()
        .await
        .into_iter()
        .map(|snap| PrinterStatus {
            tenants: tenants_by_serial.get(&snap.serial).cloned().unwrap_or_default(),
            serial: snap.serial,
            online: snap.online,
            last_seen_ms: snap.last_seen,
            age_ms: snap.age_ms,
            address: snap.address,
        })
        .collect();
    Json(out)
}

/// `GET /api/printers/:serial/history` — the serial's bounded event ring.
pub async fn printer_history(
    State(state): State<Arc<AppState>>,
    Path(serial): Path<String>,
) -> impl IntoResponse {
    Json(state.history.for_serial(&serial).await)
}

#[derive(Debug, Serialize)]
pub struct QueueItem {
    pub token: String,
    pub state: &'static str,
    pub received_at: u64,
    pub offered_at: Option<u64>,
    pub sent_at: Option<u64>,
    pub has_content: bool,
    pub customer_name: Option<String>,
    pub order_number: Option<String>,
}

/// `GET /api/tenants/:tenant/queue` — FIFO snapshot of a tenant's queue.
pub async fn tenant_queue(
    State(state): State<Arc<AppState>>,
    Path(tenant): Path<String>,
) -> impl IntoResponse {
    let items: Vec<QueueItem> = state
        .jobs
        .tenant_queue(&tenant)
        .await
        .into_iter()
        .map(|job| QueueItem {
            token: job.token,
            state: job.state.label(),
            received_at: job.received_at,
            offered_at: job.state.offered_at(),
            sent_at: job.state.sent_at(),
            has_content: job.content.is_some(),
            customer_name: job.metadata.customer_name,
            order_number: job.metadata.order_number,
        })
        .collect();
    Json(items)
}

/// `GET /api/presence` — raw dump of every presence record ever recorded.
pub async fn presence(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.presence.raw_dump().await)
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub ok: bool,
    pub refreshed: bool,
}

/// `POST /api/config/reload` — force a registry refresh, bypassing the cache.
pub async fn config_reload(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshed = refresh_on_demand(&state, state.config_source.as_ref(), true).await;
    Json(ReloadResponse { ok: true, refreshed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_codes_match_spec_examples() {
        assert!(is_success_code("OK"));
        assert!(is_success_code("ok"));
        assert!(is_success_code("200 OK"));
        assert!(is_success_code("200"));
        assert!(is_success_code("2xx-whatever"));
    }

    #[test]
    fn failure_codes_are_rejected() {
        assert!(!is_success_code("500"));
        assert!(!is_success_code("ERROR"));
        assert!(!is_success_code(""));
    }
}
