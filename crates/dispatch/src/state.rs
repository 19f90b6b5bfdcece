// SPDX-License-Identifier: BUSL-1.1

//! Shared application state threaded through every handler and background task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::config::DispatchConfig;
use crate::configsource::{ConfigCache, ConfigSource, NoConfigSource};
use crate::history::HistoryLog;
use crate::jobstore::JobStore;
use crate::presence::PresenceTracker;
use crate::registry::DeviceRegistry;
use crate::render::RenderBroker;

/// All dispatch-core state, owned by the process for its lifetime (§3 "Ownership").
pub struct AppState {
    pub registry: DeviceRegistry,
    pub jobs: JobStore,
    pub presence: PresenceTracker,
    pub history: HistoryLog,
    pub audit: AuditSink,
    pub render: RenderBroker,
    pub config_cache: ConfigCache,
    pub config_source: Arc<dyn ConfigSource>,
    pub config: DispatchConfig,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: DispatchConfig, shutdown: CancellationToken) -> Self {
        Self::with_config_source(config, shutdown, Arc::new(NoConfigSource))
    }

    pub fn with_config_source(
        config: DispatchConfig,
        shutdown: CancellationToken,
        config_source: Arc<dyn ConfigSource>,
    ) -> Self {
        let audit = AuditSink::new();
        let render = RenderBroker::new(config.render_concurrency);
        Self {
            registry: DeviceRegistry::new(),
            jobs: JobStore::new(),
            presence: PresenceTracker::new(),
            history: HistoryLog::new(),
            audit,
            render,
            config_cache: ConfigCache::new(),
            config_source,
            config,
            shutdown,
        }
    }
}
