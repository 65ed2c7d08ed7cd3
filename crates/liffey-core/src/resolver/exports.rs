//! Conditional `exports` / `imports` map evaluation.
//!
//! Supported shapes:
//! - string shorthand: `"exports": "./index.js"`
//! - explicit subpaths: `{ ".": ..., "./feature": ... }`
//! - root condition objects: `{ "import": ..., "default": ... }`
//! - single-`*` patterns (`"./*"`), most specific key wins
//! - nested condition objects and fallback arrays
//!
//! Condition objects are evaluated in declaration order against the
//! per-resolve condition set; the first matching branch wins.

use serde_json::Value;

/// The ordered condition set for one resolve call.
///
/// Computed from server-wide mode flags, never persisted.
#[derive(Debug, Clone)]
pub struct ConditionSet {
    /// Target is a browser-like client ("browser" condition matches).
    pub browser: bool,
    /// Resolving for a CJS-style consumer ("require" matches, "import" does not).
    pub require: bool,
    /// Extra ordered tags: the declared mode plus "module".
    pub tags: Vec<&'static str>,
}

impl ConditionSet {
    /// Build the condition set used by the dev server for one resolve call.
    #[must_use]
    pub fn new(production: bool, target_web: bool, is_require: bool) -> Self {
        Self {
            browser: target_web,
            require: is_require,
            tags: vec![
                if production { "production" } else { "development" },
                "module",
            ],
        }
    }

    fn matches(&self, key: &str) -> bool {
        match key {
            "default" => true,
            "browser" => self.browser,
            "require" => self.require,
            "import" => !self.require,
            tag => self.tags.contains(&tag),
        }
    }
}

/// Resolve a subpath (`"."` or `"./feature"`) through an `exports` value.
///
/// Returns the target path (starting with `"./"`, relative to the package
/// directory) or `None`; callers fall back to the `main` field on `None`.
#[must_use]
pub fn resolve_exports(exports: &Value, subpath: &str, cond: &ConditionSet) -> Option<String> {
    // String shorthand and bare condition objects only describe the root.
    if let Some(s) = exports.as_str() {
        return (subpath == ".").then(|| validate_target_path(s)).flatten();
    }

    let obj = exports.as_object()?;

    if is_condition_object(obj) {
        return (subpath == ".")
            .then(|| resolve_target(exports, cond))
            .flatten();
    }

    // Exact subpath key first.
    if let Some(target) = obj.get(subpath) {
        return resolve_target(target, cond);
    }

    resolve_pattern(obj, subpath, cond)
}

/// Resolve a `#`-prefixed specifier through an `imports` map.
#[must_use]
pub fn resolve_imports(imports: &Value, spec: &str, cond: &ConditionSet) -> Option<String> {
    if !spec.starts_with('#') {
        return None;
    }
    let target = imports.as_object()?.get(spec)?;
    resolve_target(target, cond)
}

/// A map whose keys carry no leading `.` is a bare condition object.
fn is_condition_object(obj: &serde_json::Map<String, Value>) -> bool {
    !obj.keys().any(|k| k.starts_with('.'))
}

/// Resolve an export target: string, condition object, or fallback array.
fn resolve_target(target: &Value, cond: &ConditionSet) -> Option<String> {
    match target {
        Value::String(s) => validate_target_path(s),
        Value::Object(conditions) => {
            for (key, value) in conditions {
                if !cond.matches(key) {
                    continue;
                }
                if let Some(resolved) = resolve_target(value, cond) {
                    return Some(resolved);
                }
            }
            None
        }
        // Fallback array: first entry that resolves wins.
        Value::Array(entries) => entries.iter().find_map(|e| resolve_target(e, cond)),
        _ => None,
    }
}

/// Match pattern keys (single `*`) against the subpath, preferring the most
/// specific (longest) key.
fn resolve_pattern(
    obj: &serde_json::Map<String, Value>,
    subpath: &str,
    cond: &ConditionSet,
) -> Option<String> {
    let mut matches: Vec<(&str, &Value, String)> = Vec::new();

    for (key, value) in obj {
        if !key.starts_with("./") || key.chars().filter(|&c| c == '*').count() != 1 {
            continue;
        }
        if let Some(star) = match_pattern(key, subpath) {
            matches.push((key.as_str(), value, star));
        }
    }

    matches.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let (_, target, star) = matches.first()?;
    let resolved = resolve_target(target, cond)?;
    substitute_star(&resolved, star)
}

/// Return the `*` substitution when `pattern` matches `subpath`.
fn match_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let star = pattern.find('*')?;
    let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);

    if !subpath.starts_with(prefix) {
        return None;
    }
    if !suffix.is_empty() && !subpath.ends_with(suffix) {
        return None;
    }

    let end = subpath.len().checked_sub(suffix.len())?;
    if prefix.len() >= end {
        return None;
    }

    Some(subpath[prefix.len()..end].to_string())
}

/// Substitute the matched `*` into the target, rejecting traversal.
fn substitute_star(target: &str, star: &str) -> Option<String> {
    if target.chars().filter(|&c| c == '*').count() != 1 {
        return None;
    }
    let result = target.replace('*', star);
    if !result.starts_with("./") || result.split('/').any(|seg| seg == "..") {
        return None;
    }
    Some(result)
}

/// Targets must be package-relative, starting with `"./"`.
fn validate_target_path(path: &str) -> Option<String> {
    path.starts_with("./").then(|| path.to_string())
}
