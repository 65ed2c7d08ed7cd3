//! Resolved server configuration and config file discovery.
//!
//! The config file (`liffey.config.json`) carries static settings only:
//!
//! ```json
//! {
//!   "base": "/",
//!   "server": { "port": 3000, "host": "127.0.0.1" },
//!   "resolve": { "alias": { "@": "./src" } },
//!   "define": { "__APP_VERSION__": "\"1.0.0\"" }
//! }
//! ```

use crate::error::Error;
use crate::utils::normalize_path;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Server-wide mode; feeds the resolution condition set and define defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Fully resolved configuration handed to the pipeline and its stages.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute project root.
    pub root: PathBuf,
    /// Normalized root as a forward-slash string, for id comparisons.
    pub root_id: String,
    /// Public base path, always `/`-wrapped.
    pub base: String,
    pub mode: Mode,
}

impl ResolvedConfig {
    /// Build a resolved config from a root directory, public base and mode.
    ///
    /// The root is made absolute against the current directory; the base is
    /// normalized to start and end with `/`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, base: &str, mode: Mode) -> Self {
        let root: PathBuf = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(root)
        };
        let root_id = normalize_path(&root);

        let mut base = base.trim().to_string();
        if !base.starts_with('/') {
            base.insert(0, '/');
        }
        while base.len() > 1 && base.ends_with('/') {
            base.pop();
        }

        Self {
            root,
            root_id,
            base,
            mode,
        }
    }
}

/// Static configuration loaded from `liffey.config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub base: Option<String>,
    pub mode: Option<Mode>,
    pub server: ServerSection,
    pub resolve: ResolveSection,
    pub define: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: Option<u16>,
    pub host: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolveSection {
    /// Import aliases, e.g. `@` → `./src`.
    pub alias: HashMap<String, String>,
}

const CONFIG_FILE: &str = "liffey.config.json";

/// Find the config file in `root`, if any.
#[must_use]
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    let path = root.join(CONFIG_FILE);
    crate::fs_probe::exists(&path).then_some(path)
}

/// Load the config file from `root`, or a specific path when given.
///
/// # Errors
/// Fails when an explicitly named file is missing or either file is
/// unreadable/unparseable. Auto-discovery finding nothing is `Ok(None)`.
pub fn load_config_file(
    root: &Path,
    explicit: Option<&Path>,
) -> Result<Option<(PathBuf, ConfigFile)>, Error> {
    let path = match explicit {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            if !crate::fs_probe::exists(&abs) {
                return Err(Error::other(format!(
                    "config file not found: {}",
                    abs.display()
                )));
            }
            abs
        }
        None => match find_config_file(root) {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let raw = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let config: ConfigFile =
        serde_json::from_str(&raw).map_err(|source| Error::ConfigParse {
            path: path.clone(),
            source,
        })?;

    Ok(Some((path, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolved_config_normalizes_base() {
        let config = ResolvedConfig::new("/proj", "app/", Mode::Development);
        assert_eq!(config.base, "/app");
        let config = ResolvedConfig::new("/proj", "/", Mode::Development);
        assert_eq!(config.base, "/");
    }

    #[test]
    fn test_resolved_config_root_id() {
        let config = ResolvedConfig::new("/proj/./src/..", "/", Mode::Development);
        assert_eq!(config.root_id, "/proj");
    }

    #[test]
    fn test_load_config_file_discovery() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("liffey.config.json"),
            r#"{"base": "/app", "server": {"port": 4000}}"#,
        )
        .unwrap();

        let (_, config) = load_config_file(dir.path(), None).unwrap().unwrap();
        assert_eq!(config.base.as_deref(), Some("/app"));
        assert_eq!(config.server.port, Some(4000));
    }

    #[test]
    fn test_load_config_file_none() {
        let dir = tempdir().unwrap();
        assert!(load_config_file(dir.path(), None).unwrap().is_none());
    }

    #[test]
    fn test_load_config_file_explicit_missing() {
        let dir = tempdir().unwrap();
        let result = load_config_file(dir.path(), Some(Path::new("custom.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file_invalid() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("liffey.config.json"), "{oops").unwrap();
        assert!(matches!(
            load_config_file(dir.path(), None),
            Err(Error::ConfigParse { .. })
        ));
    }
}
