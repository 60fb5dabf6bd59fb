//! Layered configuration loader.
//!
//! Discovers configuration layers (system/user/cwd/runtime), validates their
//! keys, merges them in precedence order, and produces a final
//! `SwitchboardConfig`.

mod layer_io;
mod merge;
mod schema;


use crate::{ConfigError, SwitchboardConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "switchboard.json5";
/// Default config directory under the user's home.
const DEFAULT_CONFIG_DIR: &str = ".switchboard";

#[cfg(not(windows))]
/// System-wide config path.
const SYSTEM_CONFIG_PATH: &str = "/etc/switchboard/switchboard.json5";
#[cfg(windows)]
/// System-wide config path.
const SYSTEM_CONFIG_PATH: &str = "C:\\ProgramData\\switchboard\\switchboard.json5";

/// Widest display offset the config accepts, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: SwitchboardConfig,
    /// Metadata for each layer that contributed.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Current working directory configuration.
    Cwd,
    /// Runtime overrides (highest precedence).
    Runtime,
}

/// Metadata about a loaded config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin.
    pub source: ConfigLayerSource,
    /// Location on disk.
    pub path: PathBuf,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory holding the cwd layer.
    pub cwd: PathBuf,
    /// Optional system config path (defaults to `/etc/switchboard/switchboard.json5` on Unix).
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.switchboard/switchboard.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Runtime override config paths applied last.
    pub runtime_paths: Vec<PathBuf>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::system_layer_path(),
            user_config_path: layer_io::user_layer_path(),
            runtime_paths: Vec::new(),
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl SwitchboardConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        let value: Value = json5::from_str(&contents)?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        info!(
            "loading layered config with defaults (cwd={})",
            cwd.as_ref().display()
        );
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): system, user, cwd, runtime overrides.
    /// Missing optional layers are skipped; runtime layers are required.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let mut loaded = Vec::new();
        let mut seen_paths = HashSet::new();

        let cwd_path = options.cwd.join(DEFAULT_CONFIG_FILE);
        for (source, path) in [
            (
                ConfigLayerSource::System,
                options.system_config_path.as_deref(),
            ),
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
            (ConfigLayerSource::Cwd, Some(cwd_path.as_path())),
        ] {
            if let Some(layer) = layer_io::read_if_present(source, path)? {
                if !seen_paths.insert(layer_io::layer_identity(&layer.meta.path)) {
                    debug!(
                        "skipping duplicate layer (source={:?}, path={})",
                        source,
                        layer.meta.path.display()
                    );
                    continue;
                }
                debug!("loaded {:?} layer", source);
                loaded.push(layer);
            }
        }

        for runtime_path in &options.runtime_paths {
            let layer = layer_io::read_layer(ConfigLayerSource::Runtime, runtime_path)?;
            debug!("loaded runtime layer (path={})", runtime_path.display());
            loaded.push(layer);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        let mut layers = Vec::with_capacity(loaded.len());
        for layer in loaded {
            merge::overlay(&mut merged, layer.value);
            layers.push(layer.meta);
        }

        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("sync.refresh_interval_ms", self.sync.refresh_interval_ms),
            ("sync.feed_poll_interval_ms", self.sync.feed_poll_interval_ms),
            ("backend.request_timeout_ms", self.backend.request_timeout_ms),
            (
                "messaging.request_timeout_ms",
                self.messaging.request_timeout_ms,
            ),
        ];
        for (path, value) in positive {
            if value == 0 {
                return Err(invalid_field(path, "must be greater than zero"));
            }
        }
        if self.sync.event_buffer == 0 {
            return Err(invalid_field(
                "sync.event_buffer",
                "must be greater than zero",
            ));
        }
        if self.display.utc_offset_minutes.unsigned_abs() > MAX_UTC_OFFSET_MINUTES.unsigned_abs() {
            return Err(invalid_field(
                "display.utc_offset_minutes",
                "must be within +/- 18 hours",
            ));
        }
        Ok(())
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn invalid_field(path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn config_from_value(value: Value, label: &str) -> Result<SwitchboardConfig, ConfigError> {
    schema::validate_layer_schema(&value, label)?;
    let config: SwitchboardConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
