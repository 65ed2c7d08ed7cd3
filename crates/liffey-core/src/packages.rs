//! Package manifest store.
//!
//! Loads and caches `package.json` data for resolved packages. Each manifest
//! record carries two resolved-entry caches (browser target and node target)
//! written through by the resolver, so repeated resolution of the same
//! package entry in the same environment is O(1).

use crate::error::Error;
use crate::fs_probe;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Raw manifest fields liffey cares about. Everything else is dropped at
/// parse time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    /// String or object form; consulted only through the exports evaluator.
    #[serde(default)]
    pub browser: Option<Value>,
    #[serde(default)]
    pub exports: Option<Value>,
    #[serde(default)]
    pub imports: Option<Value>,
    #[serde(default)]
    pub dependencies: Option<HashMap<String, String>>,
}

/// A loaded package manifest plus its resolved-entry caches.
///
/// Lives for the process lifetime once created; invalidation belongs to an
/// external watcher, not this store.
#[derive(Debug)]
pub struct PackageData {
    /// Directory containing the manifest file.
    pub dir: PathBuf,
    pub data: PackageInfo,
    web_resolved: RwLock<HashMap<String, String>>,
    node_resolved: RwLock<HashMap<String, String>>,
}

impl PackageData {
    /// Record a resolved entry for `(key, target)`.
    ///
    /// Two concurrent resolutions of a cold key may both compute and both
    /// write the same value; the overwrite is idempotent.
    pub fn set_resolved_cache(&self, key: &str, entry: &str, target_web: bool) {
        let cache = if target_web {
            &self.web_resolved
        } else {
            &self.node_resolved
        };
        if let Ok(mut map) = cache.write() {
            map.insert(key.to_string(), entry.to_string());
        }
    }

    /// Look up a previously resolved entry for `(key, target)`.
    #[must_use]
    pub fn get_resolved_cache(&self, key: &str, target_web: bool) -> Option<String> {
        let cache = if target_web {
            &self.web_resolved
        } else {
            &self.node_resolved
        };
        cache.read().ok().and_then(|map| map.get(key).cloned())
    }
}

/// Parse a manifest file into a [`PackageData`] with empty caches.
///
/// # Errors
/// Fails on unreadable or syntactically invalid manifests; callers walking
/// the dependency store treat that as "absent here".
pub fn load_package_data(pkg_json_path: &Path) -> Result<Arc<PackageData>, Error> {
    let raw = std::fs::read_to_string(pkg_json_path)?;
    let data: PackageInfo =
        serde_json::from_str(&raw).map_err(|source| Error::ManifestParse {
            path: pkg_json_path.to_path_buf(),
            source,
        })?;
    let dir = pkg_json_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    Ok(Arc::new(PackageData {
        dir,
        data,
        web_resolved: RwLock::new(HashMap::new()),
        node_resolved: RwLock::new(HashMap::new()),
    }))
}

/// The manifest store: loaded manifests memoized by manifest path.
///
/// A manifest record is created on first lookup and then lives as long as
/// the store (process lifetime in the server); invalidation belongs to an
/// external watcher. Sharing the record is what makes its resolved-entry
/// caches effective across requests.
#[derive(Debug, Default)]
pub struct PackageStore {
    loaded: RwLock<HashMap<PathBuf, Arc<PackageData>>>,
}

impl PackageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate the manifest owning `pkg_name`, walking the directory ancestry
    /// of `base_dir` and probing
    /// `<ancestor>/node_modules/<pkg_name>/package.json` at each level.
    ///
    /// An existing-but-unparseable manifest counts as absent at that level
    /// and the walk continues upward. Returns `None` when no ancestor owns
    /// the package.
    #[must_use]
    pub fn find_package_data(&self, pkg_name: &str, base_dir: &Path) -> Option<Arc<PackageData>> {
        let mut current = Some(base_dir);

        while let Some(dir) = current {
            let candidate = dir
                .join("node_modules")
                .join(pkg_name)
                .join("package.json");

            if let Some(pkg) = self.lookup(&candidate) {
                return Some(pkg);
            }

            if fs_probe::exists(&candidate) {
                match load_package_data(&candidate) {
                    Ok(pkg) => {
                        self.remember(&candidate, &pkg);
                        return Some(pkg);
                    }
                    Err(err) => {
                        tracing::debug!(
                            manifest = %candidate.display(),
                            error = %err,
                            "skipping unparseable package manifest"
                        );
                    }
                }
            }

            current = dir.parent();
        }

        None
    }

    fn lookup(&self, manifest_path: &Path) -> Option<Arc<PackageData>> {
        self.loaded
            .read()
            .ok()
            .and_then(|map| map.get(manifest_path).cloned())
    }

    fn remember(&self, manifest_path: &Path, pkg: &Arc<PackageData>) {
        if let Ok(mut map) = self.loaded.write() {
            map.insert(manifest_path.to_path_buf(), Arc::clone(pkg));
        }
    }
}
