//! Per-request transform orchestration.
//!
//! The entry point for serving one module: obtain content (stage `load` or
//! filesystem fallback), recover any pre-existing source map, run the
//! pipeline's transform chain and tag the result for cache validation.

use crate::config::ResolvedConfig;
use crate::error::Error;
use crate::fs_probe;
use crate::pipeline::{CombinedMap, Pipeline};
use crate::utils::{clean_url, fs_path_from_id, unwrap_id, FS_PREFIX, VALID_ID_PREFIX};
use base64::Engine;
use regex_lite::Regex;
use std::path::{Path, PathBuf};

/// Result of transforming one module for serving.
#[derive(Debug)]
pub struct TransformOutput {
    pub code: String,
    pub map: Option<CombinedMap>,
    /// Weak entity tag over the final code.
    pub etag: String,
}

/// Transform the module named by `url` for serving.
///
/// Returns `Ok(None)` when no stage loads the id and no fallback file
/// exists: not an error, just "not a module this server can serve".
///
/// # Errors
/// Propagates filesystem read failures and stage transform faults; the
/// request layer surfaces those as failed responses.
pub fn transform_request(
    config: &ResolvedConfig,
    pipeline: &Pipeline,
    url: &str,
) -> Result<Option<TransformOutput>, Error> {
    // Canonicalize the inbound id first so stages (and the rewriter's
    // relative resolution) see the real module identity, not the URL shape.
    let raw_id = unwrap_id(url);
    let id = pipeline
        .resolve_id(&raw_id, None)
        .map_or(raw_id, |partial| partial.id);

    let (code, in_map) = match pipeline.load(&id) {
        Some(output) => (output.code, output.map),
        None => {
            // No stage intercepted the id: ordinary source files are read
            // straight from disk.
            let Some(file) = module_file_path(config, &id) else {
                return Ok(None);
            };
            if !fs_probe::exists(&file) {
                return Ok(None);
            }
            let raw = liffey_util::fs::read_to_string_lossy(&file)?;
            let (map, stripped) = recover_sourcemap(&raw, &file);
            (stripped, map)
        }
    };

    let chain = pipeline.transform(&code, &id, in_map)?;
    let etag = liffey_util::hash::weak_etag(chain.code.as_bytes());

    Ok(Some(TransformOutput {
        code: chain.code,
        map: chain.map,
        etag,
    }))
}

/// Derive the fallback filesystem path for a module id, when one exists.
///
/// Canonical ids are already absolute paths; ids that never resolved keep
/// their URL shape and are joined onto the project root instead. The two
/// are disambiguated by what actually exists on disk.
fn module_file_path(config: &ResolvedConfig, id: &str) -> Option<PathBuf> {
    let file = clean_url(id);
    if file.starts_with(VALID_ID_PREFIX) || file.starts_with('\0') {
        return None;
    }
    if file.starts_with(FS_PREFIX) {
        return Some(PathBuf::from(fs_path_from_id(file)));
    }

    let as_absolute = Path::new(file);
    if as_absolute.is_absolute() && fs_probe::exists(as_absolute) {
        return Some(as_absolute.to_path_buf());
    }
    if let Some(rel) = file.strip_prefix('/') {
        return Some(config.root.join(rel));
    }
    None
}

const MAP_COMMENT: &str =
    r"(?://[#@][ \t]*sourceMappingURL=([^\r\n]+))|(?:/\*[#@][ \t]*sourceMappingURL=([^*]+)\*/)";

/// Recover a pre-existing source map from an inline comment or a sibling
/// map file, and blank the comment out of the code (byte-length preserving,
/// so recovered maps stay aligned).
///
/// Recovery faults are logged and yield "no prior map"; they never fail the
/// request.
fn recover_sourcemap(code: &str, file: &Path) -> (Option<String>, String) {
    let Ok(re) = Regex::new(MAP_COMMENT) else {
        return (None, code.to_string());
    };
    let Some(captures) = re.captures_iter(code).last() else {
        return (None, code.to_string());
    };

    let full = match captures.get(0) {
        Some(m) => m,
        None => return (None, code.to_string()),
    };
    let url = captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str().trim())
        .unwrap_or_default();

    let map = if let Some(data) = url.strip_prefix("data:") {
        match data.split_once("base64,") {
            Some((_, payload)) => base64::engine::general_purpose::STANDARD
                .decode(payload.trim())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .or_else(|| {
                    tracing::debug!(file = %file.display(), "undecodable inline source map");
                    None
                }),
            None => {
                tracing::debug!(file = %file.display(), "unsupported inline source map encoding");
                None
            }
        }
    } else {
        let sibling = file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(url);
        match std::fs::read_to_string(&sibling) {
            Ok(raw) => Some(raw),
            Err(err) => {
                tracing::debug!(
                    file = %sibling.display(),
                    error = %err,
                    "failed to read referenced source map"
                );
                None
            }
        }
    };

    let mut stripped = String::with_capacity(code.len());
    stripped.push_str(&code[..full.start()]);
    stripped.extend(std::iter::repeat(' ').take(full.end() - full.start()));
    stripped.push_str(&code[full.end()..]);

    (map, stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::pipeline::stages::VirtualStage;
    use crate::resolver::ResolveStage;
    use crate::rewrite::RewriteStage;
    use base64::Engine as _;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn setup(root: &Path) -> (ResolvedConfig, Pipeline) {
        let config = ResolvedConfig::new(root, "/", Mode::Development);
        let pipeline = Pipeline::new(vec![
            Box::new(VirtualStage::new().module("env", "export const env = {};")),
            Box::new(ResolveStage::new(&config)),
            Box::new(RewriteStage::new(&config)),
        ]);
        (config, pipeline)
    }

    fn project() -> TempDir {
        tempdir().unwrap()
    }

    #[test]
    fn test_filesystem_fallback_and_rewrite() {
        let dir = project();
        write(dir.path(), "src/util.js", "export const u = 1;");
        write(dir.path(), "src/app.js", "import { u } from './util.js';\n");

        let (config, pipeline) = setup(dir.path());
        let out = transform_request(&config, &pipeline, "/src/app.js")
            .unwrap()
            .unwrap();

        assert_eq!(out.code, "import { u } from '/src/util.js';\n");
        assert!(out.etag.starts_with("W/\""));
    }

    #[test]
    fn test_stage_load_short_circuits_filesystem() {
        let dir = project();
        let (config, pipeline) = setup(dir.path());

        let out = transform_request(&config, &pipeline, "/@id/__x00__virtual:env")
            .unwrap()
            .unwrap();
        assert_eq!(out.code, "export const env = {};");
    }

    #[test]
    fn test_unservable_module_is_none() {
        let dir = project();
        let (config, pipeline) = setup(dir.path());

        assert!(transform_request(&config, &pipeline, "/src/ghost.js")
            .unwrap()
            .is_none());
        assert!(transform_request(&config, &pipeline, "/@id/unknown")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_etag_stable_for_same_content() {
        let dir = project();
        write(dir.path(), "src/a.js", "export default 1;");

        let (config, pipeline) = setup(dir.path());
        let first = transform_request(&config, &pipeline, "/src/a.js")
            .unwrap()
            .unwrap();
        let second = transform_request(&config, &pipeline, "/src/a.js")
            .unwrap()
            .unwrap();
        assert_eq!(first.etag, second.etag);
    }

    #[test]
    fn test_inline_map_recovered_and_comment_blanked() {
        let dir = project();
        let map_json = r#"{"version":3,"sources":["/orig/a.ts"],"names":[],"mappings":"AAAA"}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(map_json);
        let source = format!(
            "export default 1;\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded}\n"
        );
        write(dir.path(), "src/compiled.js", &source);

        let (config, pipeline) = setup(dir.path());
        let out = transform_request(&config, &pipeline, "/src/compiled.js")
            .unwrap()
            .unwrap();

        assert!(!out.code.contains("sourceMappingURL"));
        match out.map {
            Some(CombinedMap::Map(map)) => {
                assert_eq!(map.sources, vec![Some("/orig/a.ts".to_string())]);
            }
            other => panic!("expected recovered map, got {other:?}"),
        }
    }

    #[test]
    fn test_sibling_map_file_recovered() {
        let dir = project();
        write(
            dir.path(),
            "src/built.js",
            "export default 2;\n//# sourceMappingURL=built.js.map\n",
        );
        write(
            dir.path(),
            "src/built.js.map",
            r#"{"version":3,"sources":["/orig/b.ts"],"names":[],"mappings":"AAAA"}"#,
        );

        let (config, pipeline) = setup(dir.path());
        let out = transform_request(&config, &pipeline, "/src/built.js")
            .unwrap()
            .unwrap();

        assert!(!out.code.contains("sourceMappingURL"));
        match out.map {
            Some(CombinedMap::Map(map)) => {
                assert_eq!(map.sources, vec![Some("/orig/b.ts".to_string())]);
            }
            other => panic!("expected recovered map, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_map_file_is_not_fatal() {
        let dir = project();
        write(
            dir.path(),
            "src/built.js",
            "export default 3;\n//# sourceMappingURL=gone.js.map\n",
        );

        let (config, pipeline) = setup(dir.path());
        let out = transform_request(&config, &pipeline, "/src/built.js")
            .unwrap()
            .unwrap();
        assert!(out.map.is_none());
        assert!(!out.code.contains("sourceMappingURL"));
    }

    #[test]
    fn test_comment_blanking_preserves_byte_length() {
        let code = "let a = 1;\n//# sourceMappingURL=a.js.map\nlet b = 2;\n";
        let (_, stripped) = recover_sourcemap(code, Path::new("/nope/a.js"));
        assert_eq!(stripped.len(), code.len());
        assert!(stripped.starts_with("let a = 1;\n"));
        assert!(stripped.ends_with("let b = 2;\n"));
    }

    #[test]
    fn test_block_comment_map_reference() {
        let code = "let a = 1;\n/*# sourceMappingURL=a.css.map */\n";
        let (_, stripped) = recover_sourcemap(code, Path::new("/nope/a.css"));
        assert!(!stripped.contains("sourceMappingURL"));
    }

    #[test]
    fn test_module_file_path_shapes() {
        let config = ResolvedConfig::new("/proj", "/", Mode::Development);
        assert_eq!(
            module_file_path(&config, "/src/a.js?v=1"),
            Some(PathBuf::from("/proj/src/a.js"))
        );
        assert_eq!(
            module_file_path(&config, "/@fs//lib/dep.js"),
            Some(PathBuf::from("/lib/dep.js"))
        );
        assert_eq!(module_file_path(&config, "\0virtual:env"), None);
        assert_eq!(module_file_path(&config, "/@id/bare-pkg"), None);
    }
}
