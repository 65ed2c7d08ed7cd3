//! Minimal-diff text editing.
//!
//! Collects `(byte range, replacement)` edits against an immutable source
//! and applies them lazily at serialization time. Untouched regions stay
//! byte-identical and the work done is proportional to the edit count, not
//! the file size. Replacements must not contain newlines so the line
//! structure survives and a column-accurate source map can be generated.

use crate::pipeline::sourcemap::{encode_mappings, Seg, SourceMap};

#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    content: String,
}

/// Range-replacement editor over a borrowed source text.
pub struct TextSplicer<'a> {
    source: &'a str,
    edits: Vec<Edit>,
}

impl<'a> TextSplicer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            edits: Vec::new(),
        }
    }

    /// Replace `source[start..end]` with `content`.
    ///
    /// Ranges must be valid, non-overlapping and newline-free in their
    /// replacement; edits may arrive in any order.
    pub fn overwrite(&mut self, start: usize, end: usize, content: impl Into<String>) {
        let content = content.into();
        debug_assert!(start <= end && end <= self.source.len());
        debug_assert!(!content.contains('\n'));
        self.edits.push(Edit {
            start,
            end,
            content,
        });
    }

    #[must_use]
    pub fn has_edits(&self) -> bool {
        !self.edits.is_empty()
    }

    fn sorted_edits(&self) -> Vec<&Edit> {
        let mut edits: Vec<&Edit> = self.edits.iter().collect();
        edits.sort_by_key(|e| e.start);
        edits
    }

    /// Serialize the edited text. With zero edits the result is the source,
    /// byte for byte.
    #[must_use]
    pub fn finish(&self) -> String {
        if self.edits.is_empty() {
            return self.source.to_string();
        }

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for edit in self.sorted_edits() {
            debug_assert!(edit.start >= cursor, "overlapping edits");
            out.push_str(&self.source[cursor..edit.start]);
            out.push_str(&edit.content);
            cursor = edit.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }

    /// Generate a column-accurate map from the edited text back to the
    /// source.
    ///
    /// The single source entry is intentionally blank; the transform
    /// context substitutes the real filename and source text when it folds
    /// incremental maps together.
    #[must_use]
    pub fn generate_map(&self) -> SourceMap {
        let mut line_starts = vec![0usize];
        for (i, b) in self.source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }

        let line_col = |pos: usize| -> (usize, usize) {
            let line = match line_starts.binary_search(&pos) {
                Ok(l) => l,
                Err(l) => l - 1,
            };
            (line, pos - line_starts[line])
        };

        let edits = self.sorted_edits();
        let mut edit_iter = edits.iter().peekable();
        let mut lines: Vec<Vec<Seg>> = Vec::with_capacity(line_starts.len());

        #[allow(clippy::cast_possible_wrap)]
        for line in 0..line_starts.len() {
            let mut segs = vec![Seg {
                gen_col: 0,
                src: Some((0, line as i64, 0)),
                name: None,
            }];

            // Output columns shift as replacements change lengths.
            let mut delta: i64 = 0;
            while let Some(edit) = edit_iter.peek() {
                let (edit_line, edit_col) = line_col(edit.start);
                if edit_line != line {
                    break;
                }
                let (_, end_col) = line_col(edit.end);
                let out_start = edit_col as i64 + delta;
                if out_start > 0 {
                    segs.push(Seg {
                        gen_col: out_start,
                        src: Some((0, line as i64, edit_col as i64)),
                        name: None,
                    });
                }
                segs.push(Seg {
                    gen_col: out_start + edit.content.len() as i64,
                    src: Some((0, line as i64, end_col as i64)),
                    name: None,
                });
                delta += edit.content.len() as i64 - (edit.end - edit.start) as i64;
                edit_iter.next();
            }

            lines.push(segs);
        }

        SourceMap {
            version: 3,
            file: None,
            source_root: None,
            sources: vec![Some(String::new())],
            sources_content: None,
            names: Vec::new(),
            mappings: encode_mappings(&lines),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sourcemap::decode_mappings;

    #[test]
    fn test_no_edits_identical_bytes() {
        let source = "import a from './a';\nconsole.log(a);\n";
        let splicer = TextSplicer::new(source);
        assert!(!splicer.has_edits());
        assert_eq!(splicer.finish(), source);
    }

    #[test]
    fn test_single_overwrite() {
        let source = "import a from './a';";
        let mut splicer = TextSplicer::new(source);
        splicer.overwrite(15, 18, "/src/a.js");
        assert_eq!(splicer.finish(), "import a from '/src/a.js';");
    }

    #[test]
    fn test_edits_applied_in_position_order() {
        let source = "aa bb cc";
        let mut splicer = TextSplicer::new(source);
        splicer.overwrite(6, 8, "C");
        splicer.overwrite(0, 2, "A");
        assert_eq!(splicer.finish(), "A bb C");
    }

    #[test]
    fn test_untouched_regions_byte_identical() {
        let source = "prefix [x] suffix";
        let mut splicer = TextSplicer::new(source);
        splicer.overwrite(8, 9, "yyy");
        let out = splicer.finish();
        assert!(out.starts_with("prefix ["));
        assert!(out.ends_with("] suffix"));
    }

    #[test]
    fn test_generate_map_identity_lines() {
        let source = "line one\nline two\n";
        let splicer = TextSplicer::new(source);
        let map = splicer.generate_map();

        assert_eq!(map.sources, vec![Some(String::new())]);
        let lines = decode_mappings(&map.mappings).unwrap();
        assert_eq!(lines[0][0].src, Some((0, 0, 0)));
        assert_eq!(lines[1][0].src, Some((0, 1, 0)));
    }

    #[test]
    fn test_generate_map_tracks_column_shift() {
        // Replace 3 bytes at col 15 with 10 bytes on line 1.
        let source = "const x = 1;\nimport a from './a';";
        let mut splicer = TextSplicer::new(source);
        splicer.overwrite(13 + 15, 13 + 18, "/src/a.js0");

        let map = splicer.generate_map();
        let lines = decode_mappings(&map.mappings).unwrap();

        // Line 1: identity anchor, edit start, post-edit re-anchor.
        assert_eq!(lines[1][0].src, Some((0, 1, 0)));
        assert_eq!(lines[1][1], Seg {
            gen_col: 15,
            src: Some((0, 1, 15)),
            name: None
        });
        assert_eq!(lines[1][2], Seg {
            gen_col: 25,
            src: Some((0, 1, 18)),
            name: None
        });
    }

    #[test]
    fn test_generate_map_two_edits_same_line() {
        let source = "f('./a', './b')";
        let mut splicer = TextSplicer::new(source);
        splicer.overwrite(3, 6, "./aaaa"); // +3
        splicer.overwrite(10, 13, "./bb"); // +1

        let out = splicer.finish();
        assert_eq!(out, "f('./aaaa', './bb')");

        let map = splicer.generate_map();
        let lines = decode_mappings(&map.mappings).unwrap();
        // Second edit's start shifts by the first edit's +3 delta.
        let seg = lines[0]
            .iter()
            .find(|s| s.src == Some((0, 0, 10)))
            .unwrap();
        assert_eq!(seg.gen_col, 13);
    }
}
