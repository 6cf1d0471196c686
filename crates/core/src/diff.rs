use std::collections::BTreeSet;

use regex::Regex;

use crate::error::ReviewError;
use crate::types::{ChangeType, DiffFile, FileCategory};

/// Parses unified-diff text into per-file records, computing each file's
/// changed-line and whitespace-only-line sets from its hunks.
pub fn parse_diff(raw: &str) -> Result<Vec<DiffFile>, ReviewError> {
    let hunk_header =
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid regex");

    let mut files = Vec::new();
    let mut current: Option<Builder> = None;
    let mut lines = raw.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(builder) = current.take() {
                files.push(builder.finish());
            }
            let path = parse_diff_git_path(rest)
                .ok_or_else(|| ReviewError::DiffParseError(format!("malformed diff header: {line}")))?;
            current = Some(Builder::new(path));
            continue;
        }

        let Some(builder) = current.as_mut() else {
            continue;
        };

        if line.starts_with("new file mode") {
            builder.change_type = ChangeType::Add;
        } else if line.starts_with("deleted file mode") {
            builder.change_type = ChangeType::Delete;
        } else if line.starts_with("rename from") || line.starts_with("rename to") {
            builder.change_type = ChangeType::Rename;
        } else if let Some(caps) = hunk_header.captures(line) {
            let target_start: u32 = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(|| ReviewError::DiffParseError(format!("malformed hunk header: {line}")))?;
            // Push the header before consuming the body: `consume_hunk` appends
            // each body line to `raw_patch` itself, so pushing here keeps the
            // header ahead of the lines it introduces.
            builder.raw_patch.push_str(line);
            builder.raw_patch.push('\n');
            builder.consume_hunk(target_start, &mut lines);
            continue;
        }

        builder.raw_patch.push_str(line);
        builder.raw_patch.push('\n');
    }

    if let Some(builder) = current.take() {
        files.push(builder.finish());
    }

    Ok(files)
}

fn parse_diff_git_path(rest: &str) -> Option<String> {
    // `a/path/to/file b/path/to/file`
    let b_marker = rest.rfind(" b/")?;
    let a_part = &rest[..b_marker];
    let path = a_part.strip_prefix("a/")?;
    Some(path.to_string())
}

struct Builder {
    path: String,
    change_type: ChangeType,
    raw_patch: String,
    changed_lines: BTreeSet<u32>,
    whitespace_only_lines: BTreeSet<u32>,
}

impl Builder {
    fn new(path: String) -> Self {
        Self {
            path,
            change_type: ChangeType::Modify,
            raw_patch: String::new(),
            changed_lines: BTreeSet::new(),
            whitespace_only_lines: BTreeSet::new(),
        }
    }

    /// Walks one hunk's body, tracking the target-side line counter and
    /// pairing up contiguous removed/added blocks to detect whitespace-only
    /// edits (same content once both sides are trimmed).
    fn consume_hunk<'a, I: Iterator<Item = &'a str>>(
        &mut self,
        target_start: u32,
        lines: &mut std::iter::Peekable<I>,
    ) {
        let mut target_line = target_start;
        let mut removed_block: Vec<String> = Vec::new();
        let mut added_block: Vec<(u32, String)> = Vec::new();

        let flush = |removed: &mut Vec<String>,
                     added: &mut Vec<(u32, String)>,
                     whitespace_only: &mut BTreeSet<u32>| {
            if removed.len() == added.len() {
                for (removed_line, (added_line_no, added_line)) in removed.iter().zip(added.iter())
                {
                    if removed_line.trim() == added_line.trim() && removed_line != added_line {
                        whitespace_only.insert(*added_line_no);
                    }
                }
            }
            removed.clear();
            added.clear();
        };

        loop {
            let Some(&peeked) = lines.peek() else {
                break;
            };
            if peeked.starts_with("diff --git ") || peeked.starts_with("@@ ") {
                break;
            }
            let line = lines.next().unwrap();
            self.raw_patch.push_str(line);
            self.raw_patch.push('\n');

            if let Some(content) = line.strip_prefix('+') {
                if line.starts_with("+++") {
                    continue;
                }
                self.changed_lines.insert(target_line);
                added_block.push((target_line, content.to_string()));
                target_line += 1;
            } else if let Some(content) = line.strip_prefix('-') {
                if line.starts_with("---") {
                    continue;
                }
                removed_block.push(content.to_string());
            } else {
                flush(
                    &mut removed_block,
                    &mut added_block,
                    &mut self.whitespace_only_lines,
                );
                target_line += 1;
            }
        }
        flush(
            &mut removed_block,
            &mut added_block,
            &mut self.whitespace_only_lines,
        );
    }

    fn finish(self) -> DiffFile {
        let category = classify_path(&self.path);
        DiffFile {
            path: self.path,
            change_type: self.change_type,
            raw_patch: self.raw_patch,
            changed_lines: self.changed_lines,
            whitespace_only_lines: self.whitespace_only_lines,
            category,
        }
    }
}

/// Maps a path to a review category via extension and directory conventions.
/// Security-sensitive paths are checked first since they override extension-based
/// categorization (e.g. `auth/login.ts` is security-sensitive, not plain source).
fn classify_path(path: &str) -> FileCategory {
    let lower = path.to_lowercase();

    let security_markers = [
        "auth", "login", "session", "token", "crypto", "password", "secret", "permission", "acl",
    ];
    if security_markers.iter().any(|m| lower.contains(m)) {
        return FileCategory::SecuritySensitive;
    }

    if lower.contains("/migrations/") || lower.ends_with(".sql") {
        return FileCategory::Database;
    }

    if lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("__tests__")
        || lower.ends_with(".test.ts")
        || lower.ends_with(".test.js")
        || lower.ends_with("_test.go")
        || lower.ends_with("_test.rs")
        || lower.starts_with("test_")
        || lower.contains("/spec/")
    {
        return FileCategory::Test;
    }

    if lower.ends_with(".md") || lower.ends_with(".mdx") || lower.contains("/docs/") {
        return FileCategory::Docs;
    }

    if lower.ends_with(".toml")
        || lower.ends_with(".yaml")
        || lower.ends_with(".yml")
        || lower.ends_with(".json")
        || lower.ends_with(".ini")
        || lower.ends_with(".env")
    {
        return FileCategory::Config;
    }

    if lower.ends_with(".html")
        || lower.ends_with(".hbs")
        || lower.ends_with(".ejs")
        || lower.ends_with(".jinja")
        || lower.ends_with(".j2")
    {
        return FileCategory::Template;
    }

    if lower.ends_with(".css") || lower.ends_with(".scss") || lower.ends_with(".less") {
        return FileCategory::Style;
    }

    FileCategory::Source
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "diff --git a/src/x.ts b/src/x.ts\n\
index 1111111..2222222 100644\n\
--- a/src/x.ts\n\
+++ b/src/x.ts\n\
@@ -10,3 +10,4 @@ fn example() {\n\
 context line\n\
-    let x = 1;\n\
+    let x = 1;\n\
+    let y = 2;\n\
 trailing context\n";

    #[test]
    fn parses_single_file_with_changed_lines() {
        let files = parse_diff(SAMPLE).unwrap();
        assert_eq!(files.len(), 1);
        let f = &files[0];
        assert_eq!(f.path, "src/x.ts");
        assert_eq!(f.change_type, ChangeType::Modify);
        assert!(f.changed_lines.contains(&11));
        assert!(f.changed_lines.contains(&12));
    }

    #[test]
    fn detects_whitespace_only_line() {
        let files = parse_diff(SAMPLE).unwrap();
        let f = &files[0];
        // line 11 ("let x = 1;") is identical content, differs only if at all in whitespace;
        // here it's byte-identical so it shouldn't be flagged as changed-whitespace since
        // the removed/added pair is literally equal (not a real diff hunk in practice, but
        // exercises the pairing logic without asserting a specific line).
        assert!(f.whitespace_only_lines.is_subset(&f.changed_lines));
    }

    #[test]
    fn classifies_security_sensitive_path() {
        assert_eq!(
            classify_path("src/auth/login.ts"),
            FileCategory::SecuritySensitive
        );
    }

    #[test]
    fn classifies_test_path() {
        assert_eq!(classify_path("src/foo.test.ts"), FileCategory::Test);
    }

    #[test]
    fn classifies_plain_source() {
        assert_eq!(classify_path("src/util.rs"), FileCategory::Source);
    }

    #[test]
    fn raw_patch_keeps_hunk_header_before_its_body() {
        let files = parse_diff(SAMPLE).unwrap();
        let f = &files[0];
        let header_pos = f.raw_patch.find("@@ -10,3 +10,4 @@").unwrap();
        let body_pos = f.raw_patch.find("let y = 2;").unwrap();
        assert!(header_pos < body_pos);
    }

    #[test]
    fn malformed_header_is_diff_parse_error() {
        let bad = "diff --git totally wrong\n";
        assert!(matches!(
            parse_diff(bad),
            Err(ReviewError::DiffParseError(_))
        ));
    }
}
