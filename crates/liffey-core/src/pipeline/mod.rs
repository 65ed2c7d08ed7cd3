//! Stage pipeline engine.
//!
//! Holds the ordered stage list and fans `resolve` / `load` / `transform`
//! requests out to stage capabilities:
//!
//! - `resolve_id`: every resolve-capable stage runs; a non-absent return
//!   overwrites the working result and iteration continues (last wins).
//! - `load`: first non-absent result wins, iteration stops.
//! - `transform`: every transform-capable stage runs in order; each receives
//!   the previous stage's output; incremental source maps accumulate on a
//!   per-call context and are composed on completion.
//!
//! A stage fault during `resolve`/`load` is a warning and the iteration
//! continues; a fault during `transform` aborts that transform call.

pub mod sourcemap;
pub mod stages;

pub use sourcemap::{combine_sourcemaps, CombinedMap, SourceMap};

use crate::config::ResolvedConfig;
use crate::utils::clean_url;
use serde_json::Value;

/// Result type for stage hooks.
pub type HookResult<T> = Result<T, StageError>;

/// Error raised by a stage hook.
#[derive(Debug)]
pub struct StageError {
    /// Stage that failed.
    pub stage: String,
    /// Hook that failed.
    pub hook: &'static str,
    pub message: String,
}

impl StageError {
    #[must_use]
    pub fn new(stage: impl Into<String>, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            hook,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.hook, self.message)
    }
}

impl std::error::Error for StageError {}

/// Where a stage runs relative to the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StageEnforce {
    /// Before normal stages (alias resolution and friends).
    Pre,
    #[default]
    Normal,
    /// After normal stages (the import rewriter).
    Post,
}

/// Capability declaration, fixed at construction.
///
/// The engine checks these once when the pipeline is built instead of
/// probing hooks per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub resolve: bool,
    pub load: bool,
    pub transform: bool,
    pub config_resolved: bool,
    pub server_start: bool,
}

/// Result of a resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialResolvedId {
    /// Resolved module id.
    pub id: String,
    /// External modules are left to the client (never fetched here).
    pub external: bool,
}

impl PartialResolvedId {
    #[must_use]
    pub fn resolved(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: false,
        }
    }

    #[must_use]
    pub fn external(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external: true,
        }
    }
}

/// Result of a load hook.
#[derive(Debug, Clone)]
pub struct LoadOutput {
    pub code: String,
    /// Raw JSON source map, if the stage produced one.
    pub map: Option<String>,
}

impl LoadOutput {
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// Result of a transform hook.
#[derive(Debug, Clone)]
pub struct StageTransformResult {
    pub code: String,
    /// Raw JSON source map for this increment, if any.
    pub map: Option<String>,
}

impl StageTransformResult {
    #[must_use]
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }

    #[must_use]
    pub fn with_map(code: impl Into<String>, map: String) -> Self {
        Self {
            code: code.into(),
            map: Some(map),
        }
    }
}

/// A named unit of the pipeline, polymorphic over its capability set.
///
/// Hooks default to "no opinion". A stage never outlives the pipeline that
/// owns it and is immutable after construction.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Which hooks this stage provides. Declared once, at construction.
    fn capabilities(&self) -> Capabilities;

    fn enforce(&self) -> StageEnforce {
        StageEnforce::Normal
    }

    /// Lifecycle fan-out barrier: a sequential stage first waits for all
    /// in-flight hook invocations of the current batch, then runs alone.
    fn sequential(&self) -> bool {
        false
    }

    /// Called once after configuration is resolved.
    fn config_resolved(&self, _config: &ResolvedConfig) -> HookResult<()> {
        Ok(())
    }

    /// Start-of-serving notification; no return value of interest.
    fn server_start(&self, _ctx: &StageCtx<'_>) -> HookResult<()> {
        Ok(())
    }

    /// Map a specifier to a module id, or decline.
    fn resolve_id(
        &self,
        _id: &str,
        _importer: Option<&str>,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<PartialResolvedId>> {
        Ok(None)
    }

    /// Provide module content for an id, or decline.
    fn load(&self, _id: &str, _ctx: &StageCtx<'_>) -> HookResult<Option<LoadOutput>> {
        Ok(None)
    }

    /// Transform module content, or pass it through.
    fn transform(
        &self,
        _code: &str,
        _id: &str,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<StageTransformResult>> {
        Ok(None)
    }
}

/// Minimal context handed to stage hooks.
pub struct StageCtx<'a> {
    pipeline: &'a Pipeline,
    stage: &'a str,
}

impl StageCtx<'_> {
    /// Ask the whole pipeline how it would resolve a specifier.
    #[must_use]
    pub fn resolve(&self, id: &str, importer: Option<&str>) -> Option<PartialResolvedId> {
        self.pipeline.resolve_id(id, importer)
    }

    /// Non-fatal diagnostic, attributed to the running stage.
    pub fn warn(&self, message: impl std::fmt::Display) {
        tracing::warn!(stage = self.stage, "{message}");
    }

    /// Build an error that fails the currently executing operation.
    #[must_use]
    pub fn error(&self, hook: &'static str, message: impl Into<String>) -> StageError {
        StageError::new(self.stage, hook, message)
    }
}

/// Output of a full transform chain.
#[derive(Debug)]
pub struct TransformChainOutput {
    pub code: String,
    /// `None` when no stage contributed a usable map.
    pub map: Option<CombinedMap>,
}

/// The ordered stage pipeline.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    resolve_order: Vec<usize>,
    load_order: Vec<usize>,
    transform_order: Vec<usize>,
}

impl Pipeline {
    /// Build a pipeline. Stages are stably sorted `Pre → Normal → Post` and
    /// per-hook iteration orders are derived once from the declared
    /// capabilities.
    #[must_use]
    pub fn new(mut stages: Vec<Box<dyn Stage>>) -> Self {
        stages.sort_by_key(|s| s.enforce());

        let mut resolve_order = Vec::new();
        let mut load_order = Vec::new();
        let mut transform_order = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            let caps = stage.capabilities();
            if caps.resolve {
                resolve_order.push(i);
            }
            if caps.load {
                load_order.push(i);
            }
            if caps.transform {
                transform_order.push(i);
            }
        }

        Self {
            stages,
            resolve_order,
            load_order,
            transform_order,
        }
    }

    /// Resolve a specifier through every resolve-capable stage.
    ///
    /// Each stage sees the current working id; a non-absent return overwrites
    /// the working result and iteration continues through the remaining
    /// stages, so the last stage with an opinion wins.
    #[must_use]
    pub fn resolve_id(&self, raw_id: &str, importer: Option<&str>) -> Option<PartialResolvedId> {
        let mut result: Option<PartialResolvedId> = None;

        for &i in &self.resolve_order {
            let stage = &self.stages[i];
            let ctx = StageCtx {
                pipeline: self,
                stage: stage.name(),
            };
            let current = result.as_ref().map_or(raw_id, |r| r.id.as_str());
            match stage.resolve_id(current, importer, &ctx) {
                Ok(Some(partial)) => result = Some(partial),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(stage = stage.name(), error = %err, "resolve hook failed, continuing");
                }
            }
        }

        result
    }

    /// Load content for an id: first stage with an opinion wins.
    #[must_use]
    pub fn load(&self, id: &str) -> Option<LoadOutput> {
        for &i in &self.load_order {
            let stage = &self.stages[i];
            let ctx = StageCtx {
                pipeline: self,
                stage: stage.name(),
            };
            match stage.load(id, &ctx) {
                Ok(Some(output)) => return Some(output),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(stage = stage.name(), error = %err, "load hook failed, continuing");
                }
            }
        }
        None
    }

    /// Run the transform chain over `code`.
    ///
    /// Every transform-capable stage runs, in order, each receiving the
    /// previous stage's output. A map supplied at entry seeds the chain. A
    /// stage error aborts the whole call with no partial result.
    ///
    /// # Errors
    /// Propagates the first stage fault verbatim.
    pub fn transform(
        &self,
        code: &str,
        id: &str,
        in_map: Option<String>,
    ) -> Result<TransformChainOutput, StageError> {
        let mut context = TransformContext::new(id, code, in_map);
        let mut code = code.to_string();

        for &i in &self.transform_order {
            let stage = &self.stages[i];
            let ctx = StageCtx {
                pipeline: self,
                stage: stage.name(),
            };
            if let Some(result) = stage.transform(&code, id, &ctx)? {
                if let Some(map) = result.map {
                    context.push_map(map);
                }
                code = result.code;
            }
        }

        let map = context.into_combined();
        Ok(TransformChainOutput { code, map })
    }

    /// Notify every config-capable stage of the resolved configuration.
    ///
    /// # Errors
    /// Propagates the first stage fault.
    pub fn config_resolved(&self, config: &ResolvedConfig) -> Result<(), StageError> {
        for stage in &self.stages {
            if stage.capabilities().config_resolved {
                stage.config_resolved(config)?;
            }
        }
        Ok(())
    }

    /// Start-of-serving fan-out.
    ///
    /// Stages without the sequential marker run as one in-flight batch; a
    /// sequential stage first drains the current batch, runs alone, and only
    /// then does scheduling continue. Ordering is guaranteed only at those
    /// barriers.
    ///
    /// # Errors
    /// Propagates the first stage fault.
    pub fn server_start(&self) -> Result<(), StageError> {
        let mut batch: Vec<usize> = Vec::new();

        for (i, stage) in self.stages.iter().enumerate() {
            if !stage.capabilities().server_start {
                continue;
            }
            if stage.sequential() {
                self.run_start_batch(&batch)?;
                batch.clear();
                let ctx = StageCtx {
                    pipeline: self,
                    stage: stage.name(),
                };
                stage.server_start(&ctx)?;
            } else {
                batch.push(i);
            }
        }

        self.run_start_batch(&batch)
    }

    fn run_start_batch(&self, batch: &[usize]) -> Result<(), StageError> {
        for &i in batch {
            let stage = &self.stages[i];
            let ctx = StageCtx {
                pipeline: self,
                stage: stage.name(),
            };
            stage.server_start(&ctx)?;
        }
        Ok(())
    }
}

/// Per-transform-call accumulation of code metadata and source maps.
///
/// Created per `transform` call, discarded when it returns.
struct TransformContext {
    filename: String,
    original_code: String,
    combined: Option<CombinedMap>,
    chain: Vec<String>,
}

impl TransformContext {
    fn new(filename: &str, original_code: &str, in_map: Option<String>) -> Self {
        Self {
            filename: filename.to_string(),
            original_code: original_code.to_string(),
            combined: None,
            chain: in_map.into_iter().collect(),
        }
    }

    fn push_map(&mut self, raw: String) {
        self.chain.push(raw);
    }

    /// Fold the chain into the running combined map.
    ///
    /// An explicitly-cleared map (the empty-`mappings` sentinel) voids all
    /// prior history; a chain entry without version info nullifies the map.
    fn into_combined(mut self) -> Option<CombinedMap> {
        if matches!(self.combined, Some(CombinedMap::Empty)) {
            return self.combined;
        }

        let mut combined = self.combined.take();
        for raw in self.chain.drain(..) {
            let Ok(value) = serde_json::from_str::<Value>(&raw) else {
                tracing::debug!(file = %self.filename, "unparseable incremental source map, dropping map");
                combined = None;
                break;
            };

            if value.get("version").is_none() {
                if value.get("mappings").and_then(Value::as_str) == Some("") {
                    combined = Some(CombinedMap::Empty);
                } else {
                    combined = None;
                }
                break;
            }

            let Ok(mut map) = serde_json::from_value::<SourceMap>(value) else {
                tracing::debug!(file = %self.filename, "malformed incremental source map, dropping map");
                combined = None;
                break;
            };

            match combined {
                None => {
                    // Text editors that omit the filename produce a single
                    // blank source; substitute the real one before merging.
                    if map.sources.len() == 1
                        && map.sources[0].as_deref().unwrap_or("").is_empty()
                    {
                        map.sources = vec![Some(self.filename.clone())];
                        map.sources_content = Some(vec![Some(self.original_code.clone())]);
                    }
                    combined = Some(CombinedMap::Map(map));
                }
                Some(CombinedMap::Map(previous)) => {
                    match combine_sourcemaps(clean_url(&self.filename), &map, &previous) {
                        Some(merged) => combined = Some(CombinedMap::Map(merged)),
                        None => {
                            tracing::debug!(file = %self.filename, "source map merge failed, dropping map");
                            combined = None;
                            break;
                        }
                    }
                }
                Some(CombinedMap::Empty) => unreachable!("empty sentinel breaks the fold"),
            }
        }

        combined
    }
}
