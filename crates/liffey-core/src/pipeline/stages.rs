//! Built-in pipeline stages: define replacement, alias resolution and
//! virtual modules.

use super::{
    Capabilities, HookResult, LoadOutput, PartialResolvedId, Stage, StageCtx, StageEnforce,
    StageTransformResult,
};
use crate::config::Mode;
use std::collections::HashMap;

/// Replaces configured tokens in module source with literal values.
///
/// Serves the same purpose as a bundler define step: constant expressions
/// like `process.env.NODE_ENV` become literals at serve time.
pub struct DefineStage {
    replacements: Vec<(String, String)>,
}

impl DefineStage {
    #[must_use]
    pub fn new(mode: Mode, user_defines: &HashMap<String, String>) -> Self {
        let mut replacements: Vec<(String, String)> = vec![
            (
                "process.env.NODE_ENV".to_string(),
                format!("\"{}\"", mode.as_str()),
            ),
            (
                "import.meta.env.MODE".to_string(),
                format!("\"{}\"", mode.as_str()),
            ),
            (
                "import.meta.env.DEV".to_string(),
                (!mode.is_production()).to_string(),
            ),
            (
                "import.meta.env.PROD".to_string(),
                mode.is_production().to_string(),
            ),
        ];
        // User defines override the defaults.
        for (from, to) in user_defines {
            replacements.retain(|(k, _)| k != from);
            replacements.push((from.clone(), to.clone()));
        }
        // Longest key first so overlapping tokens replace correctly.
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { replacements }
    }
}

impl Stage for DefineStage {
    fn name(&self) -> &str {
        "liffey:define"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            transform: true,
            ..Capabilities::default()
        }
    }

    fn transform(
        &self,
        code: &str,
        id: &str,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<StageTransformResult>> {
        if crate::utils::is_in_node_modules(id) {
            return Ok(None);
        }

        let mut result = code.to_string();
        let mut changed = false;
        for (from, to) in &self.replacements {
            if result.contains(from.as_str()) {
                result = result.replace(from.as_str(), to);
                changed = true;
            }
        }

        if changed {
            Ok(Some(StageTransformResult::code(result)))
        } else {
            Ok(None)
        }
    }
}

/// Maps import prefixes like `@/components` to project paths, ahead of the
/// filesystem resolver.
pub struct AliasStage {
    aliases: Vec<(String, String)>,
}

impl AliasStage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            aliases: Vec::new(),
        }
    }

    #[must_use]
    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.aliases.push((from.into(), to.into()));
        self
    }

    #[must_use]
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut stage = Self::new();
        for (from, to) in map {
            stage.aliases.push((from.clone(), to.clone()));
        }
        stage.aliases.sort();
        stage
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl Default for AliasStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AliasStage {
    fn name(&self) -> &str {
        "liffey:alias"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolve: true,
            ..Capabilities::default()
        }
    }

    fn enforce(&self) -> StageEnforce {
        StageEnforce::Pre
    }

    fn resolve_id(
        &self,
        id: &str,
        _importer: Option<&str>,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<PartialResolvedId>> {
        for (from, to) in &self.aliases {
            if id == from {
                return Ok(Some(PartialResolvedId::resolved(to)));
            }
            if let Some(rest) = id.strip_prefix(from.as_str()) {
                if rest.starts_with('/') {
                    return Ok(Some(PartialResolvedId::resolved(format!("{to}{rest}"))));
                }
            }
        }
        Ok(None)
    }
}

/// Serves modules that exist only in memory.
///
/// `virtual:name` specifiers resolve to `\0virtual:name` ids, which the load
/// hook recognizes and short-circuits before any filesystem read.
pub struct VirtualStage {
    modules: HashMap<String, String>,
}

impl VirtualStage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    #[must_use]
    pub fn module(mut self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.modules.insert(id.into(), code.into());
        self
    }
}

impl Default for VirtualStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for VirtualStage {
    fn name(&self) -> &str {
        "liffey:virtual"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            resolve: true,
            load: true,
            ..Capabilities::default()
        }
    }

    fn resolve_id(
        &self,
        id: &str,
        _importer: Option<&str>,
        _ctx: &StageCtx<'_>,
    ) -> HookResult<Option<PartialResolvedId>> {
        if let Some(name) = id.strip_prefix("virtual:") {
            if self.modules.contains_key(name) {
                return Ok(Some(PartialResolvedId::resolved(format!(
                    "\0virtual:{name}"
                ))));
            }
        }
        Ok(None)
    }

    fn load(&self, id: &str, _ctx: &StageCtx<'_>) -> HookResult<Option<LoadOutput>> {
        if let Some(name) = id.strip_prefix("\0virtual:") {
            if let Some(code) = self.modules.get(name) {
                return Ok(Some(LoadOutput::code(code)));
            }
        }
        Ok(None)
    }
}
