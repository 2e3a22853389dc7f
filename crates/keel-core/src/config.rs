use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::ErrorCode;
use crate::storage::Backend;

/// Directory holding a project's catalog files.
pub const KEEL_DIR: &str = ".keel";
/// Config file name inside [`KEEL_DIR`].
pub const CONFIG_FILE: &str = "config.toml";
/// Env var that overrides `[storage] backend`.
pub const BACKEND_ENV: &str = "KEEL_BACKEND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("KEEL_BACKEND: {0}")]
    Backend(String),

    #[error("machine_id {machine_id} is out of range for machine_count {machine_count}")]
    MachineId { machine_id: u32, machine_count: u32 },
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::NotInitialized,
            Self::Parse { .. } | Self::Render(_) | Self::Backend(_) | Self::MachineId { .. } => {
                ErrorCode::ConfigParseError
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeelConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub ids: IdConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,
    /// Store file; relative paths resolve against the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_true")]
    pub require_all_attributes: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            require_all_attributes: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdConfig {
    #[serde(default)]
    pub machine_id: u32,
    #[serde(default = "default_machine_count")]
    pub machine_count: u32,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            machine_id: 0,
            machine_count: default_machine_count(),
        }
    }
}

impl KeelConfig {
    /// Where the configured backend keeps its store.
    #[must_use]
    pub fn store_path(&self, project_root: &Path) -> PathBuf {
        match &self.storage.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project_root.join(path),
            None => project_root
                .join(KEEL_DIR)
                .join(self.storage.backend.default_file_name()),
        }
    }

    /// Switch backends. A configured store path belongs to the old backend
    /// and is dropped.
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        if backend != self.storage.backend {
            self.storage.backend = backend;
            self.storage.path = None;
        }
        self
    }

    /// # Errors
    ///
    /// Fails if the config cannot be rendered as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn check(self) -> Result<Self, ConfigError> {
        let IdConfig {
            machine_id,
            machine_count,
        } = self.ids;
        if machine_count == 0 || machine_id >= machine_count {
            return Err(ConfigError::MachineId {
                machine_id,
                machine_count,
            });
        }
        Ok(self)
    }
}

/// Path of the project config file under `project_root`.
#[must_use]
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(KEEL_DIR).join(CONFIG_FILE)
}

fn load_file(path: &Path) -> Result<Option<KeelConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<KeelConfig>(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Project config, else the user's `keel/config.toml`, else defaults.
///
/// # Errors
///
/// Fails if an existing config file cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<KeelConfig, ConfigError> {
    if let Some(config) = load_file(&config_path(project_root))? {
        return Ok(config);
    }
    load_user_config()
}

/// # Errors
///
/// Fails if the user config exists but cannot be read or parsed.
pub fn load_user_config() -> Result<KeelConfig, ConfigError> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(KeelConfig::default());
    };
    Ok(load_file(&config_dir.join("keel").join(CONFIG_FILE))?.unwrap_or_default())
}

/// Load config for `project_root` and apply the [`BACKEND_ENV`] override.
///
/// # Errors
///
/// Fails on unreadable config, an unknown backend name, or an id layout
/// where `machine_id >= machine_count`.
pub fn resolve_config(project_root: &Path) -> Result<KeelConfig, ConfigError> {
    let config = load_project_config(project_root)?;
    apply_backend_override(config, env::var(BACKEND_ENV).ok())?.check()
}

fn apply_backend_override(
    mut config: KeelConfig,
    env_backend: Option<String>,
) -> Result<KeelConfig, ConfigError> {
    if let Some(raw) = env_backend.filter(|raw| !raw.trim().is_empty()) {
        let backend = raw.parse::<Backend>().map_err(ConfigError::Backend)?;
        if backend != config.storage.backend {
            tracing::debug!(%backend, "backend overridden from environment");
            config = config.with_backend(backend);
        }
    }
    Ok(config)
}

const fn default_true() -> bool {
    true
}

const fn default_machine_count() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        let cfg = load_file(&config_path(root.path())).expect("load should succeed");
        assert!(cfg.is_none());

        let cfg = KeelConfig::default();
        assert_eq!(cfg.storage.backend, Backend::Sqlite);
        assert!(cfg.validation.require_all_attributes);
        assert_eq!(cfg.ids.machine_count, 1);
        assert_eq!(
            cfg.store_path(root.path()),
            root.path().join(".keel/catalog.sqlite3")
        );
    }

    #[test]
    fn project_config_parses_every_section() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(KEEL_DIR)).expect("keel dir");
        std::fs::write(
            config_path(root.path()),
            r#"
[storage]
backend = "graph"
path = "data/catalog.json"

[validation]
require_all_attributes = false

[ids]
machine_id = 2
machine_count = 3
"#,
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("parse");
        assert_eq!(cfg.storage.backend, Backend::Graph);
        assert!(!cfg.validation.require_all_attributes);
        assert_eq!(cfg.ids.machine_id, 2);
        assert_eq!(cfg.store_path(root.path()), root.path().join("data/catalog.json"));
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn malformed_config_reports_parse_error() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(KEEL_DIR)).expect("keel dir");
        std::fs::write(config_path(root.path()), "[storage\nbackend=").expect("write");

        let err = load_project_config(root.path()).expect_err("malformed");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.code(), ErrorCode::ConfigParseError);
    }

    #[test]
    fn env_backend_overrides_config_and_resets_path() {
        let mut cfg = KeelConfig::default();
        cfg.storage.path = Some(PathBuf::from("custom.sqlite3"));

        let cfg = apply_backend_override(cfg, Some("graph".into())).expect("override");
        assert_eq!(cfg.storage.backend, Backend::Graph);
        assert_eq!(cfg.storage.path, None);

        assert!(matches!(
            apply_backend_override(KeelConfig::default(), Some("cassandra".into())),
            Err(ConfigError::Backend(_))
        ));
        assert_eq!(
            apply_backend_override(KeelConfig::default(), Some("  ".into()))
                .expect("blank is ignored")
                .storage
                .backend,
            Backend::Sqlite
        );
    }

    #[test]
    fn machine_id_must_fit_machine_count() {
        let mut cfg = KeelConfig::default();
        cfg.ids.machine_id = 1;
        assert!(matches!(cfg.check(), Err(ConfigError::MachineId { .. })));
    }

    #[test]
    fn rendered_config_round_trips() {
        let mut cfg = KeelConfig::default();
        cfg.storage.backend = Backend::Graph;
        let text = cfg.to_toml().expect("render");
        assert!(text.contains("backend = \"graph\""));
        let parsed: KeelConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, cfg);
    }
}
