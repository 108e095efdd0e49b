use std::path::{Path, PathBuf};

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use coordinator::{
    registry::default_label, MissionRegistry, MissionSpec, RegistryError,
    DEFAULT_TIME_LIMIT_SECONDS,
};
use serde::Deserialize;
use shared::domain::MissionId;

const DEFAULT_CONFIG_FILE: &str = "server.toml";
const ENV_PREFIX: &str = "APP";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bind_addr: String,
    pub log_level: String,
    pub broadcast_capacity: usize,
    pub max_request_bytes: usize,
    pub missions: Vec<MissionSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8443".into(),
            log_level: "info".into(),
            broadcast_capacity: 256,
            max_request_bytes: 16 * 1024,
            missions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MissionSettings {
    pub id: u32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
}

impl Settings {
    /// Mission table for this run; the built-in table when none is configured.
    pub fn registry(&self) -> Result<MissionRegistry, RegistryError> {
        if self.missions.is_empty() {
            return Ok(MissionRegistry::default());
        }
        MissionRegistry::new(
            self.missions
                .iter()
                .map(|mission| {
                    let id = MissionId(mission.id);
                    MissionSpec {
                        id,
                        label: mission.label.clone().unwrap_or_else(|| default_label(id)),
                        time_limit_seconds: mission
                            .time_limit_seconds
                            .unwrap_or(DEFAULT_TIME_LIMIT_SECONDS),
                    }
                })
                .collect(),
        )
    }
}

/// Layers defaults, the TOML config file and `APP__*` environment variables.
///
/// An explicitly named file must exist; the default `server.toml` is optional.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with_env(explicit_path, None)
}

fn load_settings_with_env(
    explicit_path: Option<&Path>,
    env: Option<config::Map<String, String>>,
) -> anyhow::Result<Settings> {
    let (path, required) = match explicit_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let raw = Config::builder()
        .add_source(
            File::from(path.as_path())
                .format(FileFormat::Toml)
                .required(required),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        )
        .build()
        .with_context(|| format!("failed to read configuration from '{}'", path.display()))?;

    raw.try_deserialize()
        .with_context(|| format!("invalid configuration in '{}'", path.display()))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
