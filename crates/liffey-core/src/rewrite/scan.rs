//! Import specifier scanner.
//!
//! A single forward lexical pass over JavaScript source that records the
//! byte spans of import/export and dynamic-import specifier literals. No
//! syntax tree is built; comments and unrelated string literals are skipped.

/// Byte range of one specifier literal (quotes excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSpan {
    pub start: usize,
    pub end: usize,
    /// From a dynamic `import(...)` expression.
    pub dynamic: bool,
}

/// How far a static statement is scanned for its `from` clause.
const STATEMENT_SCAN_LIMIT: usize = 1000;

/// Scan source text for specifier literal spans, in source order.
#[must_use]
pub fn scan_specifier_spans(source: &str) -> Vec<ImportSpan> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < len {
        let b = bytes[i];

        // Comments.
        if b == b'/' && i + 1 < len {
            match bytes[i + 1] {
                b'/' => {
                    i += 2;
                    while i < len && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'*' => {
                    i += 2;
                    while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i = (i + 2).min(len);
                    continue;
                }
                _ => {}
            }
        }

        // Unrelated string literals: skip so their content cannot fake a
        // keyword. Import specifiers are consumed inside the keyword
        // handlers below and never reach this arm.
        if b == b'"' || b == b'\'' || b == b'`' {
            i = skip_string(bytes, i);
            continue;
        }

        if matches_keyword(bytes, i, b"import") {
            if let Some((span, next)) = scan_import(bytes, i + 6) {
                spans.push(span);
                i = next;
                continue;
            }
            i += 6;
            continue;
        }

        if matches_keyword(bytes, i, b"export") {
            if let Some((span, next)) = scan_from_clause(bytes, i + 6) {
                spans.push(span);
                i = next;
                continue;
            }
            i += 6;
            continue;
        }

        i += 1;
    }

    spans
}

/// Keyword match with word boundaries; a preceding `.` disqualifies
/// (`obj.import(...)` is a method call).
fn matches_keyword(bytes: &[u8], pos: usize, keyword: &[u8]) -> bool {
    if pos + keyword.len() > bytes.len() || &bytes[pos..pos + keyword.len()] != keyword {
        return false;
    }
    if pos > 0 {
        let prev = bytes[pos - 1];
        if is_ident_byte(prev) || prev == b'.' {
            return false;
        }
    }
    if let Some(&next) = bytes.get(pos + keyword.len()) {
        if is_ident_byte(next) {
            return false;
        }
    }
    true
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Skip a string literal starting at the opening quote; returns the index
/// past the closing quote. Template interpolation is not descended into.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            // Non-template strings do not span lines.
            b'\n' if quote != b'`' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Read a string literal's content span; `i` sits on the opening quote.
fn read_specifier(bytes: &[u8], i: usize, dynamic: bool) -> Option<(ImportSpan, usize)> {
    let quote = bytes[i];
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let start = i + 1;
    let mut j = start;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return None,
            b if b == quote => {
                return Some((
                    ImportSpan {
                        start,
                        end: j,
                        dynamic,
                    },
                    j + 1,
                ));
            }
            _ => j += 1,
        }
    }
    None
}

fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// After an `import` keyword: dynamic call, side-effect string, `import.meta`
/// or a statement with a `from` clause.
fn scan_import(bytes: &[u8], after_kw: usize) -> Option<(ImportSpan, usize)> {
    let i = skip_ws(bytes, after_kw);
    match *bytes.get(i)? {
        b'(' => {
            let j = skip_ws(bytes, i + 1);
            read_specifier(bytes, j, true)
        }
        b'.' => None, // import.meta
        b'"' | b'\'' => read_specifier(bytes, i, false),
        _ => scan_from_clause(bytes, i),
    }
}

/// Scan forward (bounded) for `from "<specifier>"`; bails at the statement
/// end so `export default` and friends produce nothing.
fn scan_from_clause(bytes: &[u8], start: usize) -> Option<(ImportSpan, usize)> {
    let limit = (start + STATEMENT_SCAN_LIMIT).min(bytes.len());
    let mut i = start;

    while i < limit {
        match bytes[i] {
            b';' => return None,
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            _ => {}
        }
        if matches_keyword(bytes, i, b"from") {
            let j = skip_ws(bytes, i + 4);
            return read_specifier(bytes, j, false);
        }
        i += 1;
    }

    None
}
