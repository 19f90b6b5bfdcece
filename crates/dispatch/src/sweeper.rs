// SPDX-License-Identifier: BUSL-1.1

//! Sweeper (§4.D) — periodic background task that rewinds jobs stuck in
//! `offered`/`sent` past their timeout back to `queued`.

use std::sync::Arc;

use crate::audit::AuditEvent;
use crate::state::AppState;

/// Spawn the sweeper as a background task. Runs until `state.shutdown` is cancelled.
pub fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.sweep_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let swept = state
                .jobs
                .sweep(state.config.offer_timeout_ms, state.config.sent_timeout_ms)
                .await;

            for job in swept {
                tracing::info!(
                    token = %job.token,
                    tenant = %job.tenant,
                    from = job.from,
                    "sweeper rewound job to queued"
                );
                state.audit.emit(AuditEvent::Requeued {
                    tenant: job.tenant,
                    token: job.token,
                    reason: job.from,
                    timestamp: crate::audit::AuditSink::now(),
                });
            }
        }

        tracing::info!("sweeper stopped");
    });
}
