// SPDX-License-Identifier: BUSL-1.1

//! Process Harness configuration (§4.J) — CLI/env parsed once at startup.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the dispatch server.
#[derive(Debug, Clone, clap::Parser)]
pub struct DispatchConfig {
    /// HTTP port.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// HTTPS port.
    #[arg(long, default_value_t = 8443, env = "HTTPS_PORT")]
    pub https_port: u16,

    /// Redirect plain HTTP to HTTPS.
    #[arg(long, default_value_t = false, env = "FORCE_HTTP_TO_HTTPS")]
    pub force_http_to_https: bool,

    /// Path to the TLS certificate (PEM).
    #[arg(long, default_value = "cert.pem", env = "TLS_CERT_PATH")]
    pub tls_cert_path: PathBuf,

    /// Path to the TLS private key (PEM).
    #[arg(long, default_value = "key.pem", env = "TLS_KEY_PATH")]
    pub tls_key_path: PathBuf,

    /// Remote source of `(tenant, serial)` pairs for the Device Registry.
    /// If unset, the registry starts from the built-in fallback mapping and
    /// is never refreshed from the network.
    #[arg(long, env = "DISPATCH_CONFIG_URL")]
    pub config_url: Option<String>,

    /// How long an `offered` job may sit before the sweeper rewinds it.
    #[arg(long, default_value_t = 10_000, env = "DISPATCH_OFFER_TIMEOUT_MS")]
    pub offer_timeout_ms: u64,

    /// How long a `sent` job may sit unconfirmed before the sweeper rewinds it.
    #[arg(long, default_value_t = 20_000, env = "DISPATCH_SENT_TIMEOUT_MS")]
    pub sent_timeout_ms: u64,

    /// How often the sweeper scans every queue.
    #[arg(long, default_value_t = 3_000, env = "DISPATCH_SWEEP_INTERVAL_MS")]
    pub sweep_interval_ms: u64,

    /// Concurrent render-broker jobs.
    #[arg(long, default_value_t = 2, env = "DISPATCH_RENDER_CONCURRENCY")]
    pub render_concurrency: usize,

    /// How often the config loader pulls the remote registry source.
    #[arg(long, default_value_t = 300_000, env = "DISPATCH_CONFIG_REFRESH_MS")]
    pub config_refresh_ms: u64,

    /// Read-through cache window for on-demand config refreshes.
    #[arg(long, default_value_t = 30_000, env = "DISPATCH_CONFIG_CACHE_MS")]
    pub config_cache_ms: u64,
}

impl DispatchConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn sent_timeout(&self) -> Duration {
        Duration::from_millis(self.sent_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn config_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.config_refresh_ms)
    }

    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.config_cache_ms)
    }
}

/// A config with short timeouts, suitable for tests that don't parse CLI args.
#[cfg(any(test, feature = "test-support"))]
pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        port: 0,
        https_port: 0,
        force_http_to_https: false,
        tls_cert_path: PathBuf::from("cert.pem"),
        tls_key_path: PathBuf::from("key.pem"),
        config_url: None,
        offer_timeout_ms: 10_000,
        sent_timeout_ms: 20_000,
        sweep_interval_ms: 3_000,
        render_concurrency: 2,
        config_refresh_ms: 300_000,
        config_cache_ms: 30_000,
    }
}
