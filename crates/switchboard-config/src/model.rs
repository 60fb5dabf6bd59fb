//! Configuration schema for Switchboard.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root config for the Switchboard console core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SwitchboardConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl SwitchboardConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> SwitchboardConfigBuilder {
        SwitchboardConfigBuilder::new()
    }
}

/// Builder for assembling a `SwitchboardConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct SwitchboardConfigBuilder {
    config: SwitchboardConfig,
}

impl SwitchboardConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: SwitchboardConfig::default(),
        }
    }

    /// Replace the backend configuration.
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.config.backend = backend;
        self
    }

    /// Replace the outbound messaging configuration.
    pub fn messaging(mut self, messaging: MessagingConfig) -> Self {
        self.config.messaging = messaging;
        self
    }

    /// Replace the synchronization configuration.
    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.config.sync = sync;
        self
    }

    /// Replace the display configuration.
    pub fn display(mut self, display: DisplayConfig) -> Self {
        self.config.display = display;
        self
    }

    /// Finalize and return the built `SwitchboardConfig`.
    pub fn build(self) -> SwitchboardConfig {
        self.config
    }
}

/// Hosted backend (PostgREST-style) connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Inline API key; prefer `api_key_env` outside local setups.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_history_table")]
    pub history_table: String,
    #[serde(default = "default_clients_table")]
    pub clients_table: String,
    #[serde(default = "default_conversation_column")]
    pub conversation_column: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            history_table: default_history_table(),
            clients_table: default_clients_table(),
            conversation_column: default_conversation_column(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// Resolve the API key from the inline value or the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_api_key_env() -> String {
    "SWITCHBOARD_API_KEY".to_string()
}

fn default_history_table() -> String {
    "chat_histories".to_string()
}

fn default_clients_table() -> String {
    "clients".to_string()
}

fn default_conversation_column() -> String {
    "session_id".to_string()
}

/// Default HTTP request timeout in milliseconds.
fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Outbound messaging (automation webhook) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl MessagingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Synchronization cadence and behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Background rescan cadence while the console is visible.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    /// Cadence of the polling change feed, when one is used.
    #[serde(default = "default_feed_poll_interval_ms")]
    pub feed_poll_interval_ms: u64,
    /// Capacity of the sync service event queue.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Replace optimistic echoes with the backend copy instead of appending it.
    #[serde(default = "default_true")]
    pub reconcile_local_echo: bool,
    /// Maximum characters of the last message kept in a summary.
    #[serde(default = "default_snippet_max_chars")]
    pub snippet_max_chars: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            feed_poll_interval_ms: default_feed_poll_interval_ms(),
            event_buffer: default_event_buffer(),
            reconcile_local_echo: true,
            snippet_max_chars: default_snippet_max_chars(),
        }
    }
}

impl SyncConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn feed_poll_interval(&self) -> Duration {
        Duration::from_millis(self.feed_poll_interval_ms)
    }
}

fn default_refresh_interval_ms() -> u64 {
    1_000
}

fn default_feed_poll_interval_ms() -> u64 {
    1_000
}

fn default_event_buffer() -> usize {
    256
}

fn default_snippet_max_chars() -> usize {
    120
}

fn default_true() -> bool {
    true
}

/// How message times are rendered in the conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// chrono format used for messages from today.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// chrono format used for older messages.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Fixed offset applied before formatting.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            date_format: default_date_format(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_time_format() -> String {
    "%H:%M".to_string()
}

fn default_date_format() -> String {
    "%d/%m/%Y".to_string()
}
