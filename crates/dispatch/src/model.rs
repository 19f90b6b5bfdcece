// SPDX-License-Identifier: BUSL-1.1

//! Core data model shared by the registry, job store, and protocol layers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unix epoch milliseconds. Matches the rest of the crate's wall-clock convention.
pub type EpochMs = u64;

/// Return the current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> EpochMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Opaque passthrough metadata attached to a job at creation, carried purely
/// for observability (history entries, query surface) — never interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderMetadata {
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

/// Lifecycle state of a job, tagged so that `offered_at`/`sent_at` are
/// unrepresentable when the status disagrees (invariant #2, SPEC_FULL.md §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Offered { offered_at: EpochMs },
    Sent { offered_at: EpochMs, sent_at: EpochMs },
    Done,
    Failed,
}

impl JobState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Offered { .. } => "offered",
            Self::Sent { .. } => "sent",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn offered_at(&self) -> Option<EpochMs> {
        match self {
            Self::Offered { offered_at } => Some(*offered_at),
            Self::Sent { offered_at, .. } => Some(*offered_at),
            _ => None,
        }
    }

    pub fn sent_at(&self) -> Option<EpochMs> {
        match self {
            Self::Sent { sent_at, .. } => Some(*sent_at),
            _ => None,
        }
    }
}

/// A unit of print dispatch.
#[derive(Debug, Clone)]
pub struct Job {
    pub token: String,
    pub tenant: String,
    pub content: Option<Arc<[u8]>>,
    pub state: JobState,
    pub received_at: EpochMs,
    pub metadata: OrderMetadata,
    /// Serial most recently offered this job, for attributing later
    /// fetch/confirm history entries to the right printer. Not part of the
    /// lifecycle state machine — purely bookkeeping for the query surface.
    pub last_serial: Option<String>,
}

impl Job {
    pub fn new(token: String, tenant: String, metadata: OrderMetadata, now: EpochMs) -> Self {
        Self {
            token,
            tenant,
            content: None,
            state: JobState::Queued,
            received_at: now,
            metadata,
            last_serial: None,
        }
    }

    pub fn is_offerable(&self) -> bool {
        matches!(self.state, JobState::Queued) && self.content.is_some()
    }
}

/// Generate a unique job token: a monotonic-ish epoch-millis prefix plus a
/// random suffix, collision-resistant for the process lifetime.
pub fn new_token(now: EpochMs) -> String {
    format!("{now:013x}-{}", uuid::Uuid::new_v4().simple())
}
