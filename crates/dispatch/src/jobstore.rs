// SPDX-License-Identifier: BUSL-1.1

//! Job Store (§4.B) — per-tenant queues, the token index, and the job
//! lifecycle state machine. The central scheduling operation,
//! `select_for_serial`, lives here.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::model::{epoch_ms, new_token, EpochMs, Job, JobState, OrderMetadata};

/// Result of `fetch_content`.
pub enum FetchOutcome {
    NotFound,
    /// Content hasn't been rendered yet; caller should return `jobReady:false`, not an error.
    Pending,
    /// Content delivered. `protocol_violation` is true when the job was
    /// still `queued` (bypassing `offered`) — allowed but logged (§9).
    Ready { bytes: Arc<[u8]>, tenant: String, serial: Option<String>, protocol_violation: bool },
}

/// Result of `confirm`.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Token unknown — treated as success per §4.F to avoid printer retry storms.
    UnknownTreatedSuccess,
    Done { tenant: String, serial: Option<String> },
    Requeued { tenant: String, serial: Option<String> },
}

/// A job the sweeper forced back to `queued`, for history/audit recording.
pub struct SweptJob {
    pub token: String,
    pub tenant: String,
    pub from: &'static str,
}

struct Inner {
    // tenant -> FIFO queue of jobs.
    queues: HashMap<String, VecDeque<Job>>,
    // token -> tenant, for O(1) lookup without scanning every queue.
    index: HashMap<String, String>,
    // serial -> round-robin cursor. Co-located with the queues themselves so
    // that select_for_serial is a single critical section (§5).
    cursors: HashMap<String, usize>,
}

impl Inner {
    fn job_mut(&mut self, token: &str) -> Option<&mut Job> {
        let tenant = self.index.get(token)?.clone();
        self.queues.get_mut(&tenant)?.iter_mut().find(|j| j.token == token)
    }
}

/// Thread-safe job store. A single mutex guards all queues and cursors;
/// critical sections are short scans over a handful of small queues.
pub struct JobStore {
    inner: Mutex<Inner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queues: HashMap::new(),
                index: HashMap::new(),
                cursors: HashMap::new(),
            }),
        }
    }

    /// Create a `queued`, content-less job. Never fails except OOM.
    pub async fn create(&self, tenant: &str, metadata: OrderMetadata) -> String {
        let now = epoch_ms();
        let token = new_token(now);
        let job = Job::new(token.clone(), tenant.to_owned(), metadata, now);

        let mut inner = self.inner.lock().await;
        inner.index.insert(token.clone(), tenant.to_owned());
        inner.queues.entry(tenant.to_owned()).or_default().push_back(job);
        token
    }

    /// Attach rasterized bytes to a job. Idempotent; silently drops if the
    /// job is absent or already has content.
    pub async fn attach_content(&self, token: &str, bytes: Arc<[u8]>) {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner.job_mut(token) {
            if job.content.is_none() {
                job.content = Some(bytes);
            }
        }
    }

    /// Transition a job to `failed`, but only if it is still `queued` and
    /// content-less (a render failure arriving after content attached, or
    /// after the job moved on, is a stale callback and is ignored).
    pub async fn mark_render_failed(&self, token: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.job_mut(token) {
            Some(job) if job.state == JobState::Queued && job.content.is_none() => {
                job.state = JobState::Failed;
                true
            }
            _ => false,
        }
    }

    /// The central scheduling operation (§4.B). `tenants` is the serial's
    /// tenant list from the Device Registry, read by the caller *before*
    /// taking this lock (registry and job-store locks are never nested).
    ///
    /// Returns the offered job plus whether this is the very first serial
    /// ever offered this job (`job.last_serial` was unset) — the caller uses
    /// this to know whether to also backfill a `received` history entry
    /// under the serial now that one is finally known (§3 "History entry";
    /// at intake time no serial has been selected yet).
    pub async fn select_for_serial(&self, serial: &str, tenants: &[String]) -> Option<(Job, bool)> {
        if tenants.is_empty() {
            return None;
        }
        let now = epoch_ms();
        let n = tenants.len();

        let mut inner = self.inner.lock().await;
        let start = *inner.cursors.get(serial).unwrap_or(&0) % n;

        for step in 0..n {
            let tenant = &tenants[(start + step) % n];
            let queue = match inner.queues.get_mut(tenant) {
                Some(q) => q,
                None => continue,
            };
            if let Some(job) = queue.iter_mut().find(|j| j.is_offerable()) {
                let first_offer = job.last_serial.is_none();
                job.state = JobState::Offered { offered_at: now };
                job.last_serial = Some(serial.to_owned());
                inner.cursors.insert(serial.to_owned(), (start + step + 1) % n);
                return Some((job.clone(), first_offer));
            }
        }
        None
    }

    /// Reset the round-robin cursor for serials whose tenant list changed
    /// (§4.A — unchanged lists keep their cursor).
    pub async fn reset_cursors(&self, serials: &[String]) {
        let mut inner = self.inner.lock().await;
        for serial in serials {
            inner.cursors.remove(serial);
        }
    }

    /// `GET /cloudprnt?token=...` — §4.F point 3.
    pub async fn fetch_content(&self, token: &str) -> FetchOutcome {
        let now = epoch_ms();
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.job_mut(token) else {
            return FetchOutcome::NotFound;
        };

        let Some(bytes) = job.content.clone() else {
            return FetchOutcome::Pending;
        };

        let protocol_violation = matches!(job.state, JobState::Queued);
        match job.state {
            JobState::Offered { offered_at } => {
                job.state = JobState::Sent { offered_at, sent_at: now };
            }
            JobState::Queued => {
                // Allowed-but-logged bypass of `offered` (§9 open question).
                job.state = JobState::Sent { offered_at: now, sent_at: now };
            }
            _ => {}
        }
        FetchOutcome::Ready {
            bytes,
            tenant: job.tenant.clone(),
            serial: job.last_serial.clone(),
            protocol_violation,
        }
    }

    /// `DELETE /cloudprnt?token=...&code=...` — §4.F point 4.
    pub async fn confirm(&self, token: &str, success: bool) -> ConfirmOutcome {
        let mut inner = self.inner.lock().await;
        let Some(tenant) = inner.index.get(token).cloned() else {
            return ConfirmOutcome::UnknownTreatedSuccess;
        };
        let serial = inner.job_mut(token).and_then(|j| j.last_serial.clone());

        if success {
            if let Some(queue) = inner.queues.get_mut(&tenant) {
                queue.retain(|j| j.token != token);
            }
            inner.index.remove(token);
            ConfirmOutcome::Done { tenant, serial }
        } else {
            if let Some(job) = inner.job_mut(token) {
                job.state = JobState::Queued;
            }
            ConfirmOutcome::Requeued { tenant, serial }
        }
    }

    /// Rewind jobs stuck past their timeout back to `queued` (§4.D), across
    /// every tenant queue.
    pub async fn sweep(&self, offer_timeout_ms: u64, sent_timeout_ms: u64) -> Vec<SweptJob> {
        let mut inner = self.inner.lock().await;
        sweep_inner(&mut inner, None, offer_timeout_ms, sent_timeout_ms)
    }

    /// Rewind stale jobs restricted to the given tenants — used by the poll
    /// handler to opportunistically sweep just the polling serial's queues
    /// (§4.F point 2) without paying for a full scan on every request.
    pub async fn sweep_tenants(
        &self,
        tenants: &[String],
        offer_timeout_ms: u64,
        sent_timeout_ms: u64,
    ) -> Vec<SweptJob> {
        let mut inner = self.inner.lock().await;
        sweep_inner(&mut inner, Some(tenants), offer_timeout_ms, sent_timeout_ms)
    }

    /// Read-only view of a single job.
    pub async fn peek(&self, token: &str) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        inner.job_mut(token).map(|j| j.clone())
    }

    /// Administrative removal, regardless of state.
    pub async fn remove(&self, token: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(tenant) = inner.index.remove(token) else {
            return false;
        };
        if let Some(queue) = inner.queues.get_mut(&tenant) {
            queue.retain(|j| j.token != token);
        }
        true
    }

    /// Snapshot of every job queued for a tenant, in FIFO order.
    pub async fn tenant_queue(&self, tenant: &str) -> Vec<Job> {
        let inner = self.inner.lock().await;
        inner.queues.get(tenant).map(|q| q.iter().cloned().collect()).unwrap_or_default()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn expired(now: EpochMs, since: EpochMs, timeout_ms: u64) -> bool {
    now.saturating_sub(since) > timeout_ms
}

fn sweep_inner(
    inner: &mut Inner,
    tenants: Option<&[String]>,
    offer_timeout_ms: u64,
    sent_timeout_ms: u64,
) -> Vec<SweptJob> {
    let now = epoch_ms();
    let mut swept = Vec::new();
    for (tenant, queue) in inner.queues.iter_mut() {
        if let Some(allowed) = tenants {
            if !allowed.iter().any(|t| t == tenant) {
                continue;
            }
        }
        for job in queue.iter_mut() {
            match job.state {
                JobState::Offered { offered_at } if expired(now, offered_at, offer_timeout_ms) => {
                    job.state = JobState::Queued;
                    swept.push(SweptJob { token: job.token.clone(), tenant: tenant.clone(), from: "offered" });
                }
                JobState::Sent { sent_at, .. } if expired(now, sent_at, sent_timeout_ms) => {
                    job.state = JobState::Queued;
                    swept.push(SweptJob { token: job.token.clone(), tenant: tenant.clone(), from: "sent" });
                }
                _ => {}
            }
        }
    }
    swept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> OrderMetadata {
        OrderMetadata::default()
    }

    #[tokio::test]
    async fn create_then_select_requires_content() {
        let store = JobStore::new();
        let token = store.create("t1", meta()).await;
        assert!(store.select_for_serial("S1", &["t1".to_string()]).await.is_none());

        store.attach_content(&token, Arc::from(vec![1, 2, 3])).await;
        let (offered, first_offer) = store.select_for_serial("S1", &["t1".to_string()]).await.unwrap();
        assert_eq!(offered.token, token);
        assert!(matches!(offered.state, JobState::Offered { .. }));
        assert!(first_offer);
    }

    #[tokio::test]
    async fn round_robin_across_tenants_sharing_a_serial() {
        let store = JobStore::new();
        let tenants = vec!["tA".to_string(), "tB".to_string()];
        let mut tokens_a = Vec::new();
        let mut tokens_b = Vec::new();
        for _ in 0..4 {
            let a = store.create("tA", meta()).await;
            store.attach_content(&a, Arc::from(vec![0u8])).await;
            tokens_a.push(a);
            let b = store.create("tB", meta()).await;
            store.attach_content(&b, Arc::from(vec![0u8])).await;
            tokens_b.push(b);
        }

        let mut order = Vec::new();
        for _ in 0..8 {
            let (job, _) = store.select_for_serial("S2", &tenants).await.unwrap();
            order.push(job.tenant);
        }
        assert_eq!(order, vec!["tA", "tB", "tA", "tB", "tA", "tB", "tA", "tB"]);
    }

    #[tokio::test]
    async fn cursor_advances_only_on_success() {
        let store = JobStore::new();
        let tenants = vec!["tA".to_string(), "tB".to_string()];
        // Only tB has a ready job.
        let b = store.create("tB", meta()).await;
        store.attach_content(&b, Arc::from(vec![0u8])).await;

        let (job, _) = store.select_for_serial("S3", &tenants).await.unwrap();
        assert_eq!(job.tenant, "tB");

        // Next ready job for tA should still be picked up starting search from tA again (cursor now at tA).
        let a = store.create("tA", meta()).await;
        store.attach_content(&a, Arc::from(vec![0u8])).await;
        let (job, _) = store.select_for_serial("S3", &tenants).await.unwrap();
        assert_eq!(job.tenant, "tA");
    }

    #[tokio::test]
    async fn confirm_unknown_token_is_treated_as_success() {
        let store = JobStore::new();
        assert_eq!(store.confirm("ghost", true).await, ConfirmOutcome::UnknownTreatedSuccess);
    }

    #[tokio::test]
    async fn confirm_twice_is_idempotent() {
        let store = JobStore::new();
        let token = store.create("t1", meta()).await;
        store.attach_content(&token, Arc::from(vec![9u8])).await;
        store.select_for_serial("S1", &["t1".to_string()]).await;

        assert_eq!(
            store.confirm(&token, true).await,
            ConfirmOutcome::Done { tenant: "t1".to_string(), serial: Some("S1".to_string()) }
        );
        assert_eq!(store.confirm(&token, true).await, ConfirmOutcome::UnknownTreatedSuccess);
        assert!(store.peek(&token).await.is_none());
    }

    #[tokio::test]
    async fn reject_requeues_and_keeps_content() {
        let store = JobStore::new();
        let token = store.create("t1", meta()).await;
        store.attach_content(&token, Arc::from(vec![9u8])).await;
        store.select_for_serial("S1", &["t1".to_string()]).await;

        assert_eq!(
            store.confirm(&token, false).await,
            ConfirmOutcome::Requeued { tenant: "t1".to_string(), serial: Some("S1".to_string()) }
        );
        let job = store.peek(&token).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.content.is_some());
    }

    #[tokio::test]
    async fn fetch_pending_when_content_missing() {
        let store = JobStore::new();
        let token = store.create("t1", meta()).await;
        assert!(matches!(store.fetch_content(&token).await, FetchOutcome::Pending));
    }

    #[tokio::test]
    async fn fetch_unknown_token_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(store.fetch_content("ghost").await, FetchOutcome::NotFound));
    }

    #[tokio::test]
    async fn sweep_rewinds_offered_past_timeout() {
        let store = JobStore::new();
        let token = store.create("t1", meta()).await;
        store.attach_content(&token, Arc::from(vec![1u8])).await;
        store.select_for_serial("S1", &["t1".to_string()]).await;

        // Not expired yet with a generous timeout.
        assert!(store.sweep(10_000, 20_000).await.is_empty());

        // Force expiry with a zero timeout.
        let swept = store.sweep(0, 20_000).await;
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].from, "offered");
        assert_eq!(store.peek(&token).await.unwrap().state, JobState::Queued);
    }
}
