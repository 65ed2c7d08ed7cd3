//! Module id and URL helpers shared across the resolver, pipeline and rewriter.

use std::borrow::Cow;
use std::path::Path;

/// Prefix marking an id that escapes the project root: `/@fs/<absolute path>`.
pub const FS_PREFIX: &str = "/@fs/";

/// Prefix wrapping an id the browser could not otherwise address: `/@id/<opaque>`.
pub const VALID_ID_PREFIX: &str = "/@id/";

/// Null bytes inside virtual ids are re-encoded to this placeholder so the
/// id survives a round trip through a URL.
pub const NULL_BYTE_PLACEHOLDER: &str = "__x00__";

/// Normalize a filesystem path to a forward-slash string with `.` and `..`
/// components folded away. Windows verbatim prefixes are simplified first.
#[must_use]
pub fn normalize_path(path: &Path) -> String {
    use std::path::Component;

    let simplified = dunce::simplified(path);
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();

    for component in simplified.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().replace('\\', "/"),
            Component::RootDir => {}
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(seg) => parts.push(seg.to_string_lossy().into_owned()),
        }
    }

    format!("{}/{}", prefix, parts.join("/"))
}

/// Strip the query/hash postfix from a URL-shaped id.
#[must_use]
pub fn clean_url(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Split an id into its bare file path and the `?query#hash` postfix.
#[must_use]
pub fn split_file_and_postfix(id: &str) -> (&str, &str) {
    let file = clean_url(id);
    (file, &id[file.len()..])
}

/// Append a trailing slash unless one is already present.
#[must_use]
pub fn with_trailing_slash(path: &str) -> Cow<'_, str> {
    if path.ends_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("{path}/"))
    }
}

/// Whether a path points into a dependency-store directory.
#[must_use]
pub fn is_in_node_modules(path: &str) -> bool {
    path.contains("node_modules")
}

/// Whether an id is a bare package specifier: starts with a word character
/// or `@`, is not a Windows drive path, and carries no `://` protocol.
#[must_use]
pub fn is_bare_import(id: &str) -> bool {
    if is_windows_drive_path(id) {
        return false;
    }
    let Some(first) = id.chars().next() else {
        return false;
    };
    if first != '@' && !first.is_alphanumeric() && first != '_' {
        return false;
    }
    !id.contains("://")
}

/// Whether an id starts with a word character (used for bare-word specifiers
/// inside markup importers).
#[must_use]
pub fn starts_with_word_char(id: &str) -> bool {
    id.chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

fn is_windows_drive_path(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Whether an id is an absolute filesystem path that is not a Windows
/// drive-relative path (`C:foo`). Both `/x` and `C:/x` qualify.
#[must_use]
pub fn is_non_drive_relative_absolute(id: &str) -> bool {
    if is_windows_drive_path(id) {
        let bytes = id.as_bytes();
        return bytes.len() >= 3 && (bytes[2] == b'/' || bytes[2] == b'\\');
    }
    id.starts_with('/')
}

/// Recover the filesystem path from a `/@fs/`-prefixed id.
///
/// `/@fs//home/dep/index.js` → `/home/dep/index.js`;
/// `/@fs/C:/dep/index.js` → `C:/dep/index.js`.
#[must_use]
pub fn fs_path_from_id(id: &str) -> String {
    let stripped = id.strip_prefix(FS_PREFIX).unwrap_or(id);
    let stripped = stripped.trim_start_matches('/');
    if is_windows_drive_path(stripped) {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

/// Wrap a still-bare resolved id so the server can recognize it on a later
/// request. Null bytes are re-encoded to a literal placeholder.
#[must_use]
pub fn wrap_id(id: &str) -> String {
    if id.starts_with(VALID_ID_PREFIX) {
        id.to_string()
    } else {
        format!("{VALID_ID_PREFIX}{}", id.replace('\0', NULL_BYTE_PLACEHOLDER))
    }
}

/// Reverse [`wrap_id`], restoring embedded null bytes.
#[must_use]
pub fn unwrap_id(id: &str) -> String {
    match id.strip_prefix(VALID_ID_PREFIX) {
        Some(rest) => rest.replace(NULL_BYTE_PLACEHOLDER, "\0"),
        None => id.to_string(),
    }
}

/// Strip the server's public base from a URL, normalizing back to a
/// root-relative form.
#[must_use]
pub fn strip_base(url: &str, base: &str) -> String {
    if base.is_empty() || base == "/" || url == base {
        return url.to_string();
    }
    let base = with_trailing_slash(base);
    match url.strip_prefix(base.as_ref()) {
        Some(rest) => format!("/{rest}"),
        None => url.to_string(),
    }
}

const JS_EXTENSIONS: &[&str] = &[
    ".js", ".jsx", ".ts", ".tsx", ".mjs", ".mts", ".cjs", ".cts",
];

/// Whether a URL names something the transform pipeline should handle.
///
/// Known script extensions qualify, as do extensionless paths (package
/// entries and directory-less ids).
#[must_use]
pub fn is_js_request(url: &str) -> bool {
    let url = clean_url(url);
    if JS_EXTENSIONS.iter().any(|ext| url.ends_with(ext)) {
        return true;
    }
    let last_segment = url.rsplit('/').next().unwrap_or(url);
    !last_segment.contains('.') && !url.ends_with('/')
}

/// Whether a URL names a style sheet (handled by a separate collaborator).
#[must_use]
pub fn is_css_request(url: &str) -> bool {
    let url = clean_url(url);
    url.ends_with(".css")
        || url.ends_with(".scss")
        || url.ends_with(".sass")
        || url.ends_with(".less")
}
