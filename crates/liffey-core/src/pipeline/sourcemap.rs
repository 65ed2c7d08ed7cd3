//! Source map model, VLQ codec and multi-map composition.
//!
//! The transform chain accumulates one incremental map per stage; the
//! composition rules live here. The merge itself mishandles nothing, but the
//! escape/unescape of absolute source paths is kept because serialized maps
//! travel through consumers that do: drive-letter and POSIX-absolute paths
//! are moved into a neutral scheme before merging and restored after.

use serde::{Deserialize, Serialize};

/// A standard version-3 source map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, rename = "sourceRoot", skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    #[serde(default)]
    pub sources: Vec<Option<String>>,
    #[serde(
        default,
        rename = "sourcesContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
}

impl SourceMap {
    /// A map for a single source with no mappings yet.
    #[must_use]
    pub fn for_source(source: &str) -> Self {
        Self {
            version: 3,
            file: None,
            source_root: None,
            sources: vec![Some(source.to_string())],
            sources_content: None,
            names: Vec::new(),
            mappings: String::new(),
        }
    }
}

/// The running combined map of one transform call.
///
/// `Empty` is the explicitly-cleared `{ "mappings": "" }` sentinel: once a
/// stage emits it, all prior map history is void.
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedMap {
    Empty,
    Map(SourceMap),
}

impl CombinedMap {
    /// Serialize for transport. The sentinel keeps its bare shape.
    #[must_use]
    pub fn to_json(&self) -> String {
        match self {
            Self::Empty => r#"{"mappings":""}"#.to_string(),
            Self::Map(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// VLQ codec
// ---------------------------------------------------------------------------

const B64_CHARS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn b64_value(c: u8) -> Option<i64> {
    match c {
        b'A'..=b'Z' => Some(i64::from(c - b'A')),
        b'a'..=b'z' => Some(i64::from(c - b'a') + 26),
        b'0'..=b'9' => Some(i64::from(c - b'0') + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

fn vlq_encode(value: i64, out: &mut String) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = vlq & 31;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 32;
        }
        #[allow(clippy::cast_sign_loss)]
        out.push(B64_CHARS[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

fn vlq_decode(bytes: &[u8], pos: &mut usize) -> Option<i64> {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    loop {
        let digit = b64_value(*bytes.get(*pos)?)?;
        *pos += 1;
        result |= (digit & 31) << shift;
        shift += 5;
        if digit & 32 == 0 {
            break;
        }
        if shift > 60 {
            return None;
        }
    }
    let negative = result & 1 == 1;
    result >>= 1;
    Some(if negative { -result } else { result })
}

/// One decoded mapping segment, with absolute (not delta) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Seg {
    pub gen_col: i64,
    /// (source index, original line, original column)
    pub src: Option<(i64, i64, i64)>,
    pub name: Option<i64>,
}

pub(crate) fn decode_mappings(mappings: &str) -> Option<Vec<Vec<Seg>>> {
    let mut lines = Vec::new();
    let (mut src_idx, mut src_line, mut src_col, mut name_idx) = (0i64, 0i64, 0i64, 0i64);

    for line in mappings.split(';') {
        let mut segs = Vec::new();
        let mut gen_col = 0i64;
        for chunk in line.split(',') {
            if chunk.is_empty() {
                continue;
            }
            let bytes = chunk.as_bytes();
            let mut pos = 0;
            gen_col += vlq_decode(bytes, &mut pos)?;
            let mut seg = Seg {
                gen_col,
                src: None,
                name: None,
            };
            if pos < bytes.len() {
                src_idx += vlq_decode(bytes, &mut pos)?;
                src_line += vlq_decode(bytes, &mut pos)?;
                src_col += vlq_decode(bytes, &mut pos)?;
                seg.src = Some((src_idx, src_line, src_col));
                if pos < bytes.len() {
                    name_idx += vlq_decode(bytes, &mut pos)?;
                    seg.name = Some(name_idx);
                }
            }
            segs.push(seg);
        }
        lines.push(segs);
    }
    Some(lines)
}

pub(crate) fn encode_mappings(lines: &[Vec<Seg>]) -> String {
    let mut out = String::new();
    let (mut src_idx, mut src_line, mut src_col, mut name_idx) = (0i64, 0i64, 0i64, 0i64);

    for (i, segs) in lines.iter().enumerate() {
        if i > 0 {
            out.push(';');
        }
        let mut gen_col = 0i64;
        for (j, seg) in segs.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            vlq_encode(seg.gen_col - gen_col, &mut out);
            gen_col = seg.gen_col;
            if let Some((s, l, c)) = seg.src {
                vlq_encode(s - src_idx, &mut out);
                vlq_encode(l - src_line, &mut out);
                vlq_encode(c - src_col, &mut out);
                src_idx = s;
                src_line = l;
                src_col = c;
                if let Some(n) = seg.name {
                    vlq_encode(n - name_idx, &mut out);
                    name_idx = n;
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Path escaping
// ---------------------------------------------------------------------------

/// Escape a drive-letter or POSIX-absolute path into a neutral scheme.
fn escape_to_neutral_path(path: &str) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
    {
        return format!("/windows/{}{}", &path[..1], path[2..].replace('\\', "/"));
    }
    if path.starts_with('/') && !path.starts_with("//") {
        return format!("/linux{path}");
    }
    path.to_string()
}

/// Reverse [`escape_to_neutral_path`].
fn unescape_neutral_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/windows/") {
        let mut chars = rest.chars();
        if let Some(drive) = chars.next() {
            return format!("{drive}:{}", chars.as_str());
        }
    }
    if let Some(rest) = path.strip_prefix("/linux/") {
        return format!("/{rest}");
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Compose `newer` (a stage's map: its output → its input) on top of `older`
/// (accumulated: stage input → original source).
///
/// Every mapped segment of `newer` is traced through `older`; the result maps
/// the newest generated code straight to the original sources. Returns `None`
/// when either map's `mappings` cannot be decoded.
#[must_use]
pub fn combine_sourcemaps(
    filename: &str,
    newer: &SourceMap,
    older: &SourceMap,
) -> Option<SourceMap> {
    let mut older = older.clone();
    for source in &mut older.sources {
        if let Some(s) = source {
            *s = escape_to_neutral_path(s);
        }
    }

    let mut merged = merge_maps(filename, newer, &older)?;

    for source in &mut merged.sources {
        if let Some(s) = source {
            *s = unescape_neutral_path(s);
        }
    }
    Some(merged)
}

#[allow(clippy::cast_possible_wrap)]
fn merge_maps(filename: &str, newer: &SourceMap, older: &SourceMap) -> Option<SourceMap> {
    let newer_lines = decode_mappings(&newer.mappings)?;
    let older_lines = decode_mappings(&older.mappings)?;

    let mut names: Vec<String> = Vec::new();
    let mut name_index = |name: &str| -> i64 {
        if let Some(idx) = names.iter().position(|n| n == name) {
            return idx as i64;
        }
        names.push(name.to_string());
        (names.len() - 1) as i64
    };

    let mut result_lines: Vec<Vec<Seg>> = Vec::with_capacity(newer_lines.len());
    for segs in &newer_lines {
        let mut out_segs = Vec::with_capacity(segs.len());
        for seg in segs {
            let Some((_, src_line, src_col)) = seg.src else {
                out_segs.push(Seg {
                    gen_col: seg.gen_col,
                    src: None,
                    name: None,
                });
                continue;
            };

            // Trace through the older map: nearest segment at or before the
            // referenced column on the referenced line.
            let traced = usize::try_from(src_line)
                .ok()
                .and_then(|l| older_lines.get(l))
                .and_then(|line| {
                    line.iter()
                        .take_while(|s| s.gen_col <= src_col)
                        .last()
                        .copied()
                });

            match traced.and_then(|t| t.src.map(|src| (src, t.name))) {
                Some((src, older_name)) => {
                    let name = seg
                        .name
                        .and_then(|n| usize::try_from(n).ok())
                        .and_then(|n| newer.names.get(n))
                        .or_else(|| {
                            older_name
                                .and_then(|n| usize::try_from(n).ok())
                                .and_then(|n| older.names.get(n))
                        })
                        .map(|n| name_index(n));
                    out_segs.push(Seg {
                        gen_col: seg.gen_col,
                        src: Some(src),
                        name,
                    });
                }
                None => out_segs.push(Seg {
                    gen_col: seg.gen_col,
                    src: None,
                    name: None,
                }),
            }
        }
        result_lines.push(out_segs);
    }

    Some(SourceMap {
        version: 3,
        file: Some(filename.to_string()),
        source_root: None,
        sources: older.sources.clone(),
        sources_content: older.sources_content.clone(),
        names,
        mappings: encode_mappings(&result_lines),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_from(value: serde_json::Value) -> SourceMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_vlq_round_trip() {
        for value in [0i64, 1, -1, 15, 16, -16, 31, 32, 1024, -4097, 123_456] {
            let mut encoded = String::new();
            vlq_encode(value, &mut encoded);
            let mut pos = 0;
            let decoded = vlq_decode(encoded.as_bytes(), &mut pos).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(pos, encoded.len());
        }
    }

    #[test]
    fn test_decode_known_mappings() {
        // "AAAA" = col 0 → source 0, line 0, col 0
        let lines = decode_mappings("AAAA").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0][0],
            Seg {
                gen_col: 0,
                src: Some((0, 0, 0)),
                name: None
            }
        );
    }

    #[test]
    fn test_mappings_round_trip() {
        let mappings = "AAAA,IAAI;;AACA,EAAE,MAAMA";
        let decoded = decode_mappings(mappings).unwrap();
        assert_eq!(encode_mappings(&decoded), mappings);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_mappings("!!").is_none());
    }

    #[test]
    fn test_escape_unescape_posix() {
        let escaped = escape_to_neutral_path("/home/app/src/a.js");
        assert_eq!(escaped, "/linux/home/app/src/a.js");
        assert_eq!(unescape_neutral_path(&escaped), "/home/app/src/a.js");
    }

    #[test]
    fn test_escape_unescape_windows() {
        let escaped = escape_to_neutral_path("C:/app/src/a.js");
        assert_eq!(escaped, "/windows/C/app/src/a.js");
        assert_eq!(unescape_neutral_path(&escaped), "C:/app/src/a.js");
    }

    #[test]
    fn test_escape_leaves_relative_alone() {
        assert_eq!(escape_to_neutral_path("../src/a.js"), "../src/a.js");
    }

    #[test]
    fn test_combine_identity() {
        // newer: identity on line 0 (two segments); older: maps to source.
        let older = map_from(json!({
            "version": 3,
            "sources": ["/abs/original.js"],
            "names": [],
            "mappings": "AAAA,IAAI"
        }));
        let newer = map_from(json!({
            "version": 3,
            "sources": [null],
            "names": [],
            "mappings": "AAAA,IAAI"
        }));

        let merged = combine_sourcemaps("/abs/out.js", &newer, &older).unwrap();
        assert_eq!(merged.sources, vec![Some("/abs/original.js".to_string())]);
        assert_eq!(merged.file.as_deref(), Some("/abs/out.js"));

        let lines = decode_mappings(&merged.mappings).unwrap();
        assert_eq!(lines[0][0].src, Some((0, 0, 0)));
        assert_eq!(lines[0][1].src, Some((0, 0, 4)));
    }

    #[test]
    fn test_combine_traces_through_shift() {
        // older: output col 0 → original col 0, output col 10 → original col 20.
        let mut older = SourceMap::for_source("orig.js");
        older.mappings = encode_mappings(&[vec![
            Seg { gen_col: 0, src: Some((0, 0, 0)), name: None },
            Seg { gen_col: 10, src: Some((0, 0, 20)), name: None },
        ]]);
        // newer references older's col 12: traces to the col-10 segment.
        let mut newer = SourceMap::for_source("mid.js");
        newer.mappings = encode_mappings(&[vec![Seg {
            gen_col: 5,
            src: Some((0, 0, 12)),
            name: None,
        }]]);

        let merged = combine_sourcemaps("out.js", &newer, &older).unwrap();
        let lines = decode_mappings(&merged.mappings).unwrap();
        assert_eq!(lines[0][0].gen_col, 5);
        assert_eq!(lines[0][0].src, Some((0, 0, 20)));
    }

    #[test]
    fn test_combine_unmapped_line_drops_source() {
        let mut older = SourceMap::for_source("orig.js");
        older.mappings = "AAAA".to_string(); // only line 0 mapped
        let mut newer = SourceMap::for_source("mid.js");
        newer.mappings = encode_mappings(&[vec![Seg {
            gen_col: 0,
            src: Some((0, 5, 0)), // line 5 does not exist in older
            name: None,
        }]]);

        let merged = combine_sourcemaps("out.js", &newer, &older).unwrap();
        let lines = decode_mappings(&merged.mappings).unwrap();
        assert_eq!(lines[0][0].src, None);
    }

    #[test]
    fn test_combine_preserves_names() {
        let mut older = map_from(json!({
            "version": 3,
            "sources": ["orig.js"],
            "names": ["fooBar"],
            "mappings": ""
        }));
        older.mappings = encode_mappings(&[vec![Seg {
            gen_col: 0,
            src: Some((0, 0, 0)),
            name: Some(0),
        }]]);
        let mut newer = SourceMap::for_source("mid.js");
        newer.mappings = encode_mappings(&[vec![Seg {
            gen_col: 3,
            src: Some((0, 0, 0)),
            name: None,
        }]]);

        let merged = combine_sourcemaps("out.js", &newer, &older).unwrap();
        assert_eq!(merged.names, vec!["fooBar".to_string()]);
        let lines = decode_mappings(&merged.mappings).unwrap();
        assert_eq!(lines[0][0].name, Some(0));
    }

    #[test]
    fn test_combine_escapes_absolute_sources_round_trip() {
        let older = map_from(json!({
            "version": 3,
            "sources": ["C:/proj/src/a.js", "/proj/src/b.js"],
            "names": [],
            "mappings": "AAAA"
        }));
        let mut newer = SourceMap::for_source("mid.js");
        newer.mappings = "AAAA".to_string();

        let merged = combine_sourcemaps("out.js", &newer, &older).unwrap();
        assert_eq!(
            merged.sources,
            vec![
                Some("C:/proj/src/a.js".to_string()),
                Some("/proj/src/b.js".to_string())
            ]
        );
    }

    #[test]
    fn test_combined_map_json() {
        assert_eq!(CombinedMap::Empty.to_json(), r#"{"mappings":""}"#);
        let map = SourceMap::for_source("a.js");
        assert!(CombinedMap::Map(map).to_json().contains("\"version\":3"));
    }
}
