//! Splitting raw diff output into per-file entries.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::DiffEntry;

const INDEX_MARKER: &str = "Index: ";
const GIT_MARKER: &str = "diff --git ";

/// Splits Subversion-style output on `Index: <path>` lines.
///
/// The marker line starts a new entry and is not part of its text. Output
/// without any marker becomes a single `Unknown` entry holding everything.
pub fn split_index_sections(raw: &str) -> Vec<DiffEntry> {
    split_sections(raw, false, |line| {
        line.strip_prefix(INDEX_MARKER).map(|path| path.to_string())
    })
}

/// Splits a git patch on `diff --git a/<old> b/<new>` lines.
///
/// Unlike the `Index:` form, the header line is kept since it belongs to the
/// patch itself.
pub fn split_git_patch(raw: &str) -> Vec<DiffEntry> {
    split_sections(raw, true, |line| {
        line.strip_prefix(GIT_MARKER).map(git_header_path)
    })
}

fn git_header_path(rest: &str) -> String {
    if let Some(path) = unchanged_header_path(rest) {
        return path.to_string();
    }
    static HEADER_RE: OnceLock<Option<Regex>> = OnceLock::new();
    HEADER_RE
        .get_or_init(|| Regex::new(r#"^"?a/.*?"? "?b/(.+?)"?$"#).ok())
        .as_ref()
        .and_then(|re| re.captures(rest).map(|caps| caps[1].to_string()))
        .unwrap_or_else(|| rest.to_string())
}

/// `a/<p> b/<p>` with both sides equal, which holds for every non-rename
/// and stays exact when `<p>` itself contains ` b/`.
fn unchanged_header_path(rest: &str) -> Option<&str> {
    let inner = rest.strip_prefix("a/")?;
    let len = inner.len().checked_sub(3)?;
    if len % 2 != 0 {
        return None;
    }
    let old = inner.get(..len / 2)?;
    let new = inner.get(len / 2..)?.strip_prefix(" b/")?;
    (old == new && !old.is_empty()).then_some(old)
}

fn split_sections<F>(raw: &str, keep_marker: bool, marker_path: F) -> Vec<DiffEntry>
where
    F: Fn(&str) -> Option<String>,
{
    let mut entries: Vec<DiffEntry> = Vec::new();

    for line in raw.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\r', '\n']);
        if let Some(path) = marker_path(bare) {
            let text = if keep_marker { line.to_string() } else { String::new() };
            entries.push(DiffEntry::new(path, text));
            continue;
        }
        // Text before the first marker has no owner; it is dropped unless
        // no marker turns up at all.
        if let Some(current) = entries.last_mut() {
            current.diff_text.push_str(line);
        }
    }

    if entries.is_empty() {
        entries.push(DiffEntry::unknown(raw));
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNKNOWN_PATH;

    const SVN_DIFF: &str = "Index: trunk/a.txt\n\
===================================================================\n\
--- trunk/a.txt\t(revision 3)\n\
+++ trunk/a.txt\t(revision 4)\n\
@@ -1 +1 @@\n\
-old\n\
+new\n\
Index: trunk/b.txt\n\
===================================================================\n\
--- trunk/b.txt\t(nonexistent)\n\
+++ trunk/b.txt\t(revision 4)\n\
@@ -0,0 +1 @@\n\
+added\n";

    #[test]
    fn test_two_index_markers() {
        let entries = split_index_sections(SVN_DIFF);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "trunk/a.txt");
        assert_eq!(entries[1].path, "trunk/b.txt");
        assert!(!entries[0].diff_text.contains("Index: "));
        assert!(entries[0].diff_text.starts_with("====="));
        assert!(entries[0].diff_text.ends_with("+new\n"));
        assert!(entries[1].diff_text.ends_with("+added\n"));

        let rebuilt = format!(
            "Index: trunk/a.txt\n{}Index: trunk/b.txt\n{}",
            entries[0].diff_text, entries[1].diff_text
        );
        assert_eq!(rebuilt, SVN_DIFF);
    }

    #[test]
    fn test_no_marker_is_unknown() {
        let raw = "property changes only\nsvn:ignore\n";
        let entries = split_index_sections(raw);
        assert_eq!(entries, vec![DiffEntry::new(UNKNOWN_PATH, raw)]);
    }

    #[test]
    fn test_empty_output_is_unknown() {
        let entries = split_index_sections("");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, UNKNOWN_PATH);
        assert_eq!(entries[0].diff_text, "");
    }

    #[test]
    fn test_marker_must_start_line() {
        let raw = "see Index: foo\n";
        let entries = split_index_sections(raw);
        assert_eq!(entries[0].path, UNKNOWN_PATH);
    }

    #[test]
    fn test_crlf_marker_path() {
        let entries = split_index_sections("Index: src/x.c\r\n+line\r\n");
        assert_eq!(entries[0].path, "src/x.c");
        assert_eq!(entries[0].diff_text, "+line\r\n");
    }

    #[test]
    fn test_git_patch_per_file() {
        let raw = "diff --git a/src/lib.rs b/src/lib.rs\n\
index 1111111..2222222 100644\n\
--- a/src/lib.rs\n\
+++ b/src/lib.rs\n\
@@ -1 +1 @@\n\
-a\n\
+b\n\
diff --git a/old name.txt b/new name.txt\n\
similarity index 100%\n\
rename from old name.txt\n\
rename to new name.txt\n";
        let entries = split_git_patch(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "src/lib.rs");
        assert!(entries[0].diff_text.starts_with("diff --git a/src/lib.rs"));
        assert_eq!(entries[1].path, "new name.txt");
        assert_eq!(
            entries.iter().map(|e| e.diff_text.as_str()).collect::<String>(),
            raw
        );
    }

    #[test]
    fn test_git_path_containing_b_segment() {
        let raw = "diff --git a/docs/a b/c.md b/docs/a b/c.md\n+x\n\
diff --git a/x b/y.txt b/x b/y.txt\n+y\n";
        let entries = split_git_patch(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "docs/a b/c.md");
        assert_eq!(entries[1].path, "x b/y.txt");
    }
}
