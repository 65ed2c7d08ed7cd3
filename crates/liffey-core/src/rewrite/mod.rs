//! Static import rewriting.
//!
//! Turns raw module source into text whose import specifiers are already
//! browser-addressable URLs: project files become root-relative paths,
//! out-of-root files get the filesystem-escape prefix and ids that stay
//! bare are wrapped with the opaque-id prefix. Only the specifier literals
//! themselves are touched; everything else is byte-identical.

mod scan;
mod splice;

pub use scan::{scan_specifier_spans, ImportSpan};
pub use splice::TextSplicer;

use crate::config::ResolvedConfig;
use crate::pipeline::{
    Capabilities, HookResult, Stage, StageCtx, StageEnforce, StageTransformResult,
};
use crate::utils::{
    clean_url, is_css_request, is_non_drive_relative_absolute, strip_base, with_trailing_slash,
    wrap_id, FS_PREFIX,
};

/// Formats that never contain import specifiers, plus style sheets (which a
/// separate collaborator serves).
#[must_use]
pub fn can_skip_rewrite(id: &str) -> bool {
    let file = clean_url(id);
    file.ends_with(".map") || file.ends_with(".json") || is_css_request(id)
}

/// The import rewriter as a transform stage, enforced after the normal
/// stages so it sees their output.
pub struct RewriteStage {
    root_id: String,
    base: String,
}

impl RewriteStage {
    #[must_use]
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            root_id: config.root_id.clone(),
            base: config.base.clone(),
        }
    }

    /// Re-express a resolved module id as a browser-addressable URL.
    fn to_browser_url(&self, resolved: &str) -> String {
        let root = with_trailing_slash(&self.root_id);
        let url = if let Some(rel) = resolved.strip_prefix(root.as_ref()) {
            format!("/{rel}")
        } else if is_non_drive_relative_absolute(resolved) {
            if resolved.starts_with('/') {
                format!("/@fs{resolved}")
            } else {
                format!("{FS_PREFIX}{resolved}")
            }
        } else {
            resolved.to_string()
        };

        // Anything still bare-looking needs the opaque-id wrapper to be
        // recognizable when the browser requests it back.
        if url.starts_with('.') || url.starts_with('/') {
            url
        } else {
            wrap_id(&url)
        }
    }
}

impl Stage for RewriteStage {
    fn name(&self) -> &str {
        "liffey:import-rewrite"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transform: true,
            ..Capabilities::default()
        }
    }

    fn enforce(&self) -> StageEnforce {
        StageEnforce::Post
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        ctx: &StageCtx<'_>,
    ) -> HookResult<Option<StageTransformResult>> {
        if can_skip_rewrite(id) {
            return Ok(None);
        }

        let spans = scan_specifier_spans(code);
        if spans.is_empty() {
            return Ok(None);
        }

        let mut splicer = TextSplicer::new(code);
        for span in &spans {
            let specifier = &code[span.start..span.end];
            if specifier.is_empty()
                || specifier.contains("://")
                || specifier.starts_with("data:")
            {
                continue;
            }

            let stripped = strip_base(specifier, &self.base);
            let Some(resolved) = ctx.resolve(&stripped, Some(id)) else {
                ctx.warn(format_args!(
                    "failed to resolve import {specifier:?} from {id}"
                ));
                continue;
            };
            if resolved.external {
                continue;
            }

            let url = self.to_browser_url(&resolved.id);
            if url != specifier {
                // JSON escaping, applied content-only: the original quote
                // characters around the literal stay in place.
                if let Ok(quoted) = serde_json::to_string(&url) {
                    splicer.overwrite(span.start, span.end, &quoted[1..quoted.len() - 1]);
                }
            }
        }

        if !splicer.has_edits() {
            return Ok(None);
        }

        let map = splicer.generate_map();
        let code = splicer.finish();
        match serde_json::to_string(&map) {
            Ok(raw_map) => Ok(Some(StageTransformResult::with_map(code, raw_map))),
            Err(_) => Ok(Some(StageTransformResult::code(code))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::pipeline::stages::VirtualStage;
    use crate::pipeline::{CombinedMap, Pipeline};
    use crate::resolver::ResolveStage;
    use crate::utils::normalize_path;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn pipeline_for(root: &Path) -> (Pipeline, ResolvedConfig) {
        let config = ResolvedConfig::new(root, "/", Mode::Development);
        let pipeline = Pipeline::new(vec![
            Box::new(ResolveStage::new(&config)),
            Box::new(RewriteStage::new(&config)),
        ]);
        (pipeline, config)
    }

    fn project() -> TempDir {
        tempdir().unwrap()
    }

    #[test]
    fn test_can_skip_rewrite() {
        assert!(can_skip_rewrite("/src/a.js.map"));
        assert!(can_skip_rewrite("/data/config.json?v=1"));
        assert!(can_skip_rewrite("/src/style.css"));
        assert!(!can_skip_rewrite("/src/a.js"));
    }

    #[test]
    fn test_rewrites_relative_to_root_relative() {
        let dir = project();
        write(dir.path(), "src/app.js", "import util from './util';");
        write(dir.path(), "src/util.js", "export default 1;");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("import util from './util.js';", &importer, None)
            .unwrap();

        assert_eq!(out.code, "import util from '/src/util.js';");
    }

    #[test]
    fn test_rewrites_extensionless_relative() {
        let dir = project();
        write(dir.path(), "src/app.js", "import util from './util';");
        write(dir.path(), "src/util.js", "export default 1;");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("import util from './util';", &importer, None)
            .unwrap();

        assert_eq!(out.code, "import util from '/src/util.js';");
    }

    #[test]
    fn test_zero_specifiers_identical_and_unmapped() {
        let dir = project();
        let (pipeline, _) = pipeline_for(dir.path());

        let source = "const answer = 42;\nconsole.log(answer);\n";
        let out = pipeline
            .transform(source, "/src/plain.js", None)
            .unwrap();

        assert_eq!(out.code, source);
        assert!(out.map.is_none());
    }

    #[test]
    fn test_nothing_to_rewrite_leaves_bytes() {
        // A specifier that is already a served URL resolves back to itself.
        let dir = project();
        write(dir.path(), "src/dep.js", "export {};");

        let (pipeline, _) = pipeline_for(dir.path());
        let source = "import dep from '/src/dep.js';";
        let out = pipeline.transform(source, "/src/app.js", None).unwrap();
        assert_eq!(out.code, source);
        assert!(out.map.is_none());
    }

    #[test]
    fn test_outside_root_gets_fs_prefix() {
        let dep_dir = project();
        write(dep_dir.path(), "linked/mod.js", "export {};");
        let abs = normalize_path(&dep_dir.path().join("linked/mod.js"));

        let dir = project();
        write(dir.path(), "src/app.js", "");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let source = format!("import m from '{abs}';");
        let out = pipeline.transform(&source, &importer, None).unwrap();

        assert_eq!(out.code, format!("import m from '/@fs{abs}';"));
    }

    #[test]
    fn test_inside_root_is_root_relative() {
        let dir = project();
        write(
            dir.path(),
            "node_modules/left-pad/package.json",
            r#"{"name": "left-pad", "main": "index.js"}"#,
        );
        write(dir.path(), "node_modules/left-pad/index.js", "export {};");
        write(dir.path(), "src/app.js", "");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("import pad from 'left-pad';", &importer, None)
            .unwrap();

        assert_eq!(
            out.code,
            "import pad from '/node_modules/left-pad/index.js';"
        );
    }

    #[test]
    fn test_unresolved_specifier_left_alone() {
        let dir = project();
        write(dir.path(), "src/app.js", "");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let source = "import ghost from 'not-installed';";
        let out = pipeline.transform(source, &importer, None).unwrap();
        assert_eq!(out.code, source);
    }

    #[test]
    fn test_dynamic_import_rewritten() {
        let dir = project();
        write(dir.path(), "src/lazy.js", "export {};");
        write(dir.path(), "src/app.js", "");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("const p = import('./lazy.js');", &importer, None)
            .unwrap();

        assert_eq!(out.code, "const p = import('/src/lazy.js');");
    }

    #[test]
    fn test_virtual_id_wrapped_opaque() {
        let dir = project();
        write(dir.path(), "src/app.js", "");

        let config = ResolvedConfig::new(dir.path(), "/", Mode::Development);
        let pipeline = Pipeline::new(vec![
            Box::new(VirtualStage::new().module("env", "export const env = {};")),
            Box::new(ResolveStage::new(&config)),
            Box::new(RewriteStage::new(&config)),
        ]);

        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("import 'virtual:env';", &importer, None)
            .unwrap();

        assert_eq!(out.code, "import '/@id/__x00__virtual:env';");
    }

    #[test]
    fn test_base_stripped_before_resolve() {
        let dir = project();
        write(dir.path(), "src/dep.js", "export {};");

        let config = ResolvedConfig::new(dir.path(), "/app", Mode::Development);
        let pipeline = Pipeline::new(vec![
            Box::new(ResolveStage::new(&config)),
            Box::new(RewriteStage::new(&config)),
        ]);

        let out = pipeline
            .transform("import d from '/app/src/dep.js';", "/src/main.js", None)
            .unwrap();
        assert_eq!(out.code, "import d from '/src/dep.js';");
    }

    #[test]
    fn test_external_url_untouched() {
        let dir = project();
        let (pipeline, _) = pipeline_for(dir.path());
        let source = "import x from 'https://cdn.example.com/x.js';";
        let out = pipeline.transform(source, "/src/app.js", None).unwrap();
        assert_eq!(out.code, source);
    }

    #[test]
    fn test_rewrite_produces_composable_map() {
        let dir = project();
        write(dir.path(), "src/util.js", "export {};");
        write(dir.path(), "src/app.js", "");

        let (pipeline, _) = pipeline_for(dir.path());
        let importer = normalize_path(&dir.path().join("src/app.js"));
        let out = pipeline
            .transform("import u from './util.js';", &importer, None)
            .unwrap();

        match out.map {
            Some(CombinedMap::Map(map)) => {
                // The blank source is substituted with the module id.
                assert_eq!(map.sources, vec![Some(importer.clone())]);
                assert!(!map.mappings.is_empty());
            }
            other => panic!("expected a real composed map, got {other:?}"),
        }
    }

    #[test]
    fn test_css_request_skipped() {
        let dir = project();
        let (pipeline, _) = pipeline_for(dir.path());
        let source = "@import './other.css';";
        let out = pipeline
            .transform(source, "/src/style.css", None)
            .unwrap();
        assert_eq!(out.code, source);
    }
}
