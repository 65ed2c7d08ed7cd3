//! Module specifier resolver.
//!
//! Turns import specifiers into canonical module ids: absolute normalized
//! filesystem paths (plus any `?query#hash` postfix) or opaque prefixed ids.
//! Bare package specifiers go through the manifest store, honoring
//! conditional export maps, with per-package entry caching.

mod exports;

pub use exports::{resolve_exports, resolve_imports, ConditionSet};

use crate::config::ResolvedConfig;
use crate::fs_probe::{self, FsEntry};
use crate::packages::{PackageData, PackageStore};
use crate::pipeline::{Capabilities, HookResult, PartialResolvedId, Stage, StageCtx};
use crate::utils::{
    clean_url, fs_path_from_id, is_bare_import, is_in_node_modules,
    is_non_drive_relative_absolute, normalize_path, split_file_and_postfix,
    starts_with_word_char, with_trailing_slash, FS_PREFIX,
};
use std::path::{Path, PathBuf};

/// Server-wide flags feeding each resolve call.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Absolute project root.
    pub root: PathBuf,
    pub production: bool,
    /// Resolving for a browser-like client.
    pub target_web: bool,
}

/// Extensions probed, in order, for extensionless candidates.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json"];

/// Clean-resolve a filesystem candidate: split off the postfix, probe the
/// bare path, reattach the postfix on success.
///
/// Dependencies occasionally use `#` in published subpaths, which authored
/// source never does, so for dependency-store paths the probe first runs
/// against the path with the `#` fragment kept (cutting only at a later
/// query).
#[must_use]
pub fn try_fs_resolve(fs_path: &str) -> Option<String> {
    if let Some(hash_idx) = fs_path.find('#') {
        if is_in_node_modules(fs_path) {
            let query_idx = fs_path.find('?');
            // Only foo#bar?baz and foo#bar qualify, not foo?bar#baz.
            if query_idx.map_or(true, |q| q > hash_idx) {
                let file = match query_idx {
                    Some(q) => &fs_path[..q],
                    None => fs_path,
                };
                if let Some(resolved) = try_clean_fs_resolve(file) {
                    return Some(format!("{resolved}{}", &fs_path[file.len()..]));
                }
            }
        }
    }

    let (file, postfix) = split_file_and_postfix(fs_path);
    try_clean_fs_resolve(file).map(|resolved| format!("{resolved}{postfix}"))
}

/// Probe one bare path, then extension variants. Files resolve to their
/// normalized path; directories do not resolve at this layer (package entry
/// expansion is separate).
fn try_clean_fs_resolve(file: &str) -> Option<String> {
    if let Some(FsEntry::File(normalized)) = fs_probe::probe(Path::new(file)) {
        return Some(normalized);
    }

    for ext in DEFAULT_EXTENSIONS {
        let candidate = format!("{file}{ext}");
        if let Some(FsEntry::File(normalized)) = fs_probe::probe(Path::new(&candidate)) {
            return Some(normalized);
        }
    }

    None
}

/// Split a bare specifier into package name and optional deep subpath.
///
/// `@scope/pkg/sub` → (`@scope/pkg`, `Some("sub")`); `pkg` → (`pkg`, `None`).
fn split_package_specifier(id: &str) -> (&str, Option<&str>) {
    let name_segments = if id.starts_with('@') { 2 } else { 1 };
    let mut idx = 0;
    for _ in 0..name_segments {
        match id[idx..].find('/') {
            Some(slash) => idx += slash + 1,
            None => return (id, None),
        }
    }
    (&id[..idx - 1], Some(&id[idx..]))
}

/// Resolve a package's root entry (`"."`), consulting and filling the
/// manifest's per-target cache.
///
/// Entry precedence: conditional `exports` map, then `main`, then
/// `index.js` / `index.json` / `index.node` probes.
#[must_use]
pub fn resolve_package_entry(
    id: &str,
    pkg: &PackageData,
    target_web: bool,
    cond: &ConditionSet,
) -> Option<String> {
    let (_, postfix) = split_file_and_postfix(id);

    if let Some(cached) = pkg.get_resolved_cache(".", target_web) {
        return Some(format!("{cached}{postfix}"));
    }

    let entry = pkg
        .data
        .exports
        .as_ref()
        .and_then(|exports| resolve_exports(exports, ".", cond))
        .or_else(|| pkg.data.main.clone());

    let candidates: Vec<String> = match entry {
        Some(e) => vec![e],
        None => vec![
            "index.js".to_string(),
            "index.json".to_string(),
            "index.node".to_string(),
        ],
    };

    for candidate in candidates {
        let candidate_path = pkg.dir.join(candidate.trim_start_matches("./"));
        if let Some(resolved) = try_fs_resolve(&normalize_path(&candidate_path)) {
            pkg.set_resolved_cache(".", &resolved, target_web);
            return Some(format!("{resolved}{postfix}"));
        }
    }

    None
}

/// Resolve a deep import (`pkg/sub`) inside an already-located package.
///
/// With an `exports` map present the subpath must match it; without one the
/// subpath joins the package directory directly.
#[must_use]
pub fn resolve_deep_import(
    subpath: &str,
    pkg: &PackageData,
    target_web: bool,
    cond: &ConditionSet,
) -> Option<String> {
    let (file, postfix) = split_file_and_postfix(subpath);
    let rel = format!("./{file}");

    if let Some(cached) = pkg.get_resolved_cache(&rel, target_web) {
        return Some(format!("{cached}{postfix}"));
    }

    let resolved = match &pkg.data.exports {
        Some(exports) => resolve_exports(exports, &rel, cond)
            .and_then(|target| {
                try_fs_resolve(&normalize_path(
                    &pkg.dir.join(target.trim_start_matches("./")),
                ))
            }),
        None => try_fs_resolve(&normalize_path(&pkg.dir.join(file))),
    }?;

    pkg.set_resolved_cache(&rel, &resolved, target_web);
    Some(format!("{resolved}{postfix}"))
}

/// Resolve a bare package specifier from an importing module.
///
/// Any failure along the way (missing manifest, unmatched exports, absent
/// entry file) is a plain miss; callers fall through to the next specifier
/// class.
#[must_use]
pub fn try_node_resolve(
    id: &str,
    importer: Option<&str>,
    opts: &ResolveOptions,
    store: &PackageStore,
) -> Option<String> {
    let pkg_id = clean_url(id);

    let mut basedir = opts.root.as_path();
    if let Some(importer) = importer {
        let importer_file = clean_url(importer);
        // A trailing `*` marks synthetic importers appended by style
        // processing; they never exist on disk.
        if Path::new(importer_file).is_absolute()
            && (importer.ends_with('*') || fs_probe::exists(Path::new(importer_file)))
        {
            if let Some(parent) = Path::new(importer_file).parent() {
                basedir = parent;
            }
        }
    }

    let (pkg_name, deep) = split_package_specifier(pkg_id);
    let pkg = store.find_package_data(pkg_name, basedir)?;
    let cond = ConditionSet::new(opts.production, opts.target_web, false);

    match deep {
        Some(_) => {
            // Reattach the postfix the clean split removed.
            let subpath_with_postfix = &id[pkg_name.len() + 1..];
            resolve_deep_import(subpath_with_postfix, &pkg, opts.target_web, &cond)
        }
        None => resolve_package_entry(id, &pkg, opts.target_web, &cond),
    }
}

/// The resolver as a pipeline stage.
///
/// Specifier classes, first success wins: filesystem-escape ids,
/// root-absolute ids, relative ids (plus bare words inside markup
/// importers), plain absolute paths, bare package specifiers.
pub struct ResolveStage {
    opts: ResolveOptions,
    root_id: String,
    store: PackageStore,
}

impl ResolveStage {
    #[must_use]
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            opts: ResolveOptions {
                root: config.root.clone(),
                production: config.mode.is_production(),
                target_web: true,
            },
            root_id: config.root_id.clone(),
            store: PackageStore::new(),
        }
    }

    #[must_use]
    pub fn from_options(opts: ResolveOptions) -> Self {
        let root_id = normalize_path(&opts.root);
        Self {
            opts,
            root_id,
            store: PackageStore::new(),
        }
    }
}

impl Stage for ResolveStage {
    fn name(&self) -> &str {
        "liffey:resolve"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolve: true,
            ..Capabilities::default()
        }
    }

    fn resolve_id(
        &self,
        id: &str,
        importer: Option<&str>,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<PartialResolvedId>> {
        // Filesystem-escape ids name paths outside the project root.
        if id.starts_with(FS_PREFIX) {
            let fs_path = fs_path_from_id(id);
            if let Some(resolved) = try_fs_resolve(&fs_path) {
                return Ok(Some(PartialResolvedId::resolved(resolved)));
            }
            return Ok(None);
        }

        // Root-absolute ids, unless the id already carries the root.
        if id.starts_with('/') && !id.starts_with(with_trailing_slash(&self.root_id).as_ref()) {
            let fs_path = self.opts.root.join(&id[1..]);
            if let Some(resolved) = try_fs_resolve(&normalize_path(&fs_path)) {
                return Ok(Some(PartialResolvedId::resolved(resolved)));
            }
        }

        // Relative ids, and bare words written straight into markup.
        if id.starts_with('.')
            || (importer.is_some_and(|i| clean_url(i).ends_with(".html"))
                && starts_with_word_char(id))
        {
            let basedir = importer
                .map(clean_url)
                .map(Path::new)
                .and_then(Path::parent)
                .map_or_else(|| self.opts.root.clone(), Path::to_path_buf);
            let fs_path = basedir.join(id);
            if let Some(resolved) = try_fs_resolve(&normalize_path(&fs_path)) {
                return Ok(Some(PartialResolvedId::resolved(resolved)));
            }
        }

        // Already-absolute filesystem paths.
        if is_non_drive_relative_absolute(id) {
            if let Some(resolved) = try_fs_resolve(id) {
                return Ok(Some(PartialResolvedId::resolved(resolved)));
            }
        }

        // Bare package specifiers.
        if is_bare_import(id) {
            if let Some(resolved) = try_node_resolve(id, importer, &self.opts, &self.store) {
                return Ok(Some(PartialResolvedId::resolved(resolved)));
            }
        }

        Ok(None)
    }
}
