//! Reading config layers from disk and the default layer locations.

use super::{
    ConfigLayer, ConfigLayerSource, DEFAULT_CONFIG_DIR, DEFAULT_CONFIG_FILE, LoadedLayer,
    SYSTEM_CONFIG_PATH, schema,
};
use crate::ConfigError;
use directories::UserDirs;
use log::debug;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Read a discovered layer; an unset or absent file is not an error.
pub(super) fn read_if_present(
    source: ConfigLayerSource,
    path: Option<&Path>,
) -> Result<Option<LoadedLayer>, ConfigError> {
    match path {
        Some(path) if path.exists() => read_layer(source, path).map(Some),
        Some(path) => {
            debug!(
                "no config layer (source={:?}, path={})",
                source,
                path.display()
            );
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Parse one JSON5 layer and check its keys before any merge.
pub(super) fn read_layer(source: ConfigLayerSource, path: &Path) -> Result<LoadedLayer, ConfigError> {
    debug!(
        "reading config layer (source={:?}, path={})",
        source,
        path.display()
    );
    let value: Value = json5::from_str(&fs::read_to_string(path)?)?;
    let label = format!("{}({})", source_name(source), path.display());
    schema::validate_layer_schema(&value, &label)?;
    Ok(LoadedLayer {
        meta: ConfigLayer {
            source,
            path: path.to_path_buf(),
        },
        value,
    })
}

/// Identity of a layer file; the same file reached twice loads once.
pub(super) fn layer_identity(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn source_name(source: ConfigLayerSource) -> &'static str {
    match source {
        ConfigLayerSource::System => "system",
        ConfigLayerSource::User => "user",
        ConfigLayerSource::Cwd => "cwd",
        ConfigLayerSource::Runtime => "runtime",
    }
}

pub(super) fn system_layer_path() -> Option<PathBuf> {
    Some(PathBuf::from(SYSTEM_CONFIG_PATH))
}

/// `~/.switchboard/switchboard.json5` for the current user.
pub(super) fn user_layer_path() -> Option<PathBuf> {
    let dirs = UserDirs::new()?;
    Some(dirs.home_dir().join(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
}
