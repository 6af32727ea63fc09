//! Diff preparation (§4.6 step 4): parses a unified-diff hunk header,
//! drops removed lines, and produces the two parallel renderings the rest
//! of the pipeline needs — `codeWithLines` for the LLM, `codeWithoutLines`
//! for fingerprinting.

use regex::Regex;
use std::sync::OnceLock;

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,\d+)? @@").unwrap())
}

/// Parses a unified-diff hunk header (`@@ -_,_ +start,_ @@`) and recovers
/// the starting line number of the new file. Returns `None` — logged by
/// the caller — when the header doesn't parse (§4.6 step 4).
pub fn parse_hunk_start_line(hunk_header: &str) -> Option<u32> {
    hunk_header_re()
        .captures(hunk_header)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A single-line comment prefix/suffix for a language, chosen by file
/// extension. Falls back to no comment when the extension is unrecognized
/// (§4.6 step 4).
fn line_comment_for_extension(extension: &str) -> Option<(&'static str, &'static str)> {
    match extension {
        "rs" | "go" | "js" | "jsx" | "ts" | "tsx" | "java" | "kt" | "c" | "h" | "cpp" | "hpp" | "cs" | "swift"
        | "scala" | "groovy" | "dart" => Some(("//", "")),
        "py" | "rb" | "sh" | "bash" | "yaml" | "yml" | "toml" | "pl" | "r" => Some(("#", "")),
        "sql" => Some(("--", "")),
        "html" | "xml" | "vue" | "svelte" => Some(("<!--", "-->")),
        "css" | "scss" | "less" => Some(("/*", "*/")),
        _ => None,
    }
}

fn extension_of(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// One kept (non-removed) line of a diff hunk, paired with its line number
/// in the new file.
#[derive(Debug, Clone)]
pub struct KeptLine {
    pub line_number: u32,
    pub text: String,
}

/// The two parallel renderings produced by `prepare_code_for_review`.
#[derive(Debug, Clone)]
pub struct PreparedCode {
    /// Each kept line prefixed with a single-line comment carrying its line
    /// number — what the LLM sees.
    pub code_with_lines: String,
    /// The bare kept lines, with no line-number annotations — what
    /// fingerprinting hashes, so cosmetic re-pushes that don't touch
    /// content still hit the cache.
    pub code_without_lines: String,
    pub lines: Vec<KeptLine>,
}

/// Walks a unified diff hunk's body (lines after the `@@ ... @@` header),
/// dropping removed (`-`) lines, and renders the kept lines two ways
/// (§4.6 step 4). `new_path` selects the per-language commenter.
pub fn prepare_code_for_review(hunk_body: &str, hunk_header: &str, new_path: &str) -> Result<PreparedCode, crate::error::ReviewError> {
    let start_line = parse_hunk_start_line(hunk_header)
        .ok_or_else(|| crate::error::ReviewError::UnparseableHunkHeader(hunk_header.to_string()))?;

    let commenter = line_comment_for_extension(&extension_of(new_path));

    let mut lines = Vec::new();
    let mut line_number = start_line;

    for raw in hunk_body.lines() {
        if let Some(removed) = raw.strip_prefix('-') {
            let _ = removed; // removed lines don't advance the new-file line counter
            continue;
        }
        let content = raw.strip_prefix('+').or_else(|| raw.strip_prefix(' ')).unwrap_or(raw);
        lines.push(KeptLine {
            line_number,
            text: content.to_string(),
        });
        line_number += 1;
    }

    let code_with_lines = lines
        .iter()
        .map(|l| match commenter {
            Some((open, close)) if close.is_empty() => format!("{open} {} {}\n{}", l.line_number, open, l.text),
            Some((open, close)) => format!("{open} {} {close}\n{}", l.line_number, l.text),
            None => l.text.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    let code_without_lines = lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n");

    Ok(PreparedCode {
        code_with_lines,
        code_without_lines,
        lines,
    })
}

/// Splits a multi-hunk unified diff (as returned by a merge-request diff
/// API) into `(header, body)` pairs, one per `@@ ... @@` section. A diff
/// with no hunk headers at all yields no pairs.
pub fn split_hunks(diff_text: &str) -> Vec<(String, String)> {
    let mut hunks = Vec::new();
    let mut header: Option<String> = None;
    let mut body = String::new();

    for line in diff_text.lines() {
        if line.starts_with("@@") {
            if let Some(prev_header) = header.take() {
                hunks.push((prev_header, std::mem::take(&mut body)));
            }
            header = Some(line.to_string());
        } else if header.is_some() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
    }
    if let Some(prev_header) = header {
        hunks.push((prev_header, body));
    }
    hunks
}

/// Prepares a whole file diff (possibly several hunks) for review by
/// running `prepare_code_for_review` over each hunk and concatenating the
/// renderings in order (§4.6 step 4, one review unit per file diff).
pub fn prepare_file_diff_for_review(diff_text: &str, new_path: &str) -> Result<PreparedCode, crate::error::ReviewError> {
    let hunks = split_hunks(diff_text);
    if hunks.is_empty() {
        return Err(crate::error::ReviewError::UnparseableHunkHeader(diff_text.to_string()));
    }

    let mut combined = PreparedCode {
        code_with_lines: String::new(),
        code_without_lines: String::new(),
        lines: Vec::new(),
    };

    for (header, body) in hunks {
        let prepared = prepare_code_for_review(&body, &header, new_path)?;
        if !combined.code_with_lines.is_empty() && !prepared.code_with_lines.is_empty() {
            combined.code_with_lines.push('\n');
        }
        combined.code_with_lines.push_str(&prepared.code_with_lines);
        if !combined.code_without_lines.is_empty() && !prepared.code_without_lines.is_empty() {
            combined.code_without_lines.push('\n');
        }
        combined.code_without_lines.push_str(&prepared.code_without_lines);
        combined.lines.extend(prepared.lines);
    }

    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_standard_hunk_header() {
        assert_eq!(parse_hunk_start_line("@@ -10,3 +12,5 @@ fn foo() {"), Some(12));
    }

    #[test]
    fn parses_a_hunk_header_with_no_trailing_count() {
        assert_eq!(parse_hunk_start_line("@@ -1 +1 @@"), Some(1));
    }

    #[test]
    fn unparseable_header_returns_none() {
        assert_eq!(parse_hunk_start_line("not a hunk header"), None);
    }

    #[test]
    fn two_invocations_produce_identical_code_without_lines() {
        let hunk = "-let old = 1;\n+let new = 2;\n some_context();";
        let header = "@@ -1,2 +1,2 @@";
        let a = prepare_code_for_review(hunk, header, "src/main.rs").unwrap();
        let b = prepare_code_for_review(hunk, header, "src/main.rs").unwrap();
        assert_eq!(a.code_without_lines, b.code_without_lines);
    }

    #[test]
    fn removed_lines_are_dropped_and_do_not_advance_line_numbers() {
        let hunk = "-removed one\n-removed two\n+kept one\n kept two";
        let header = "@@ -1,4 +10,2 @@";
        let prepared = prepare_code_for_review(hunk, header, "src/main.rs").unwrap();
        assert_eq!(prepared.lines.len(), 2);
        assert_eq!(prepared.lines[0].line_number, 10);
        assert_eq!(prepared.lines[1].line_number, 11);
        assert!(!prepared.code_without_lines.contains("removed"));
    }

    #[test]
    fn code_with_lines_embeds_a_rust_style_comment() {
        let hunk = "+fn main() {}";
        let header = "@@ -1,0 +5,1 @@";
        let prepared = prepare_code_for_review(hunk, header, "src/main.rs").unwrap();
        assert!(prepared.code_with_lines.contains("// 5 //"));
    }

    #[test]
    fn unknown_extension_falls_back_to_no_comment() {
        let hunk = "+some content";
        let header = "@@ -1,0 +1,1 @@";
        let prepared = prepare_code_for_review(hunk, header, "src/main.unknownext").unwrap();
        assert_eq!(prepared.code_with_lines, "some content");
    }

    #[test]
    fn unparseable_hunk_header_fails_the_unit() {
        let err = prepare_code_for_review("+x", "garbage", "src/main.rs").unwrap_err();
        assert!(matches!(err, crate::error::ReviewError::UnparseableHunkHeader(_)));
    }

    #[test]
    fn split_hunks_separates_multiple_sections() {
        let diff = "@@ -1,1 +1,1 @@\n+a\n@@ -5,1 +5,1 @@\n+b";
        let hunks = split_hunks(diff);
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].0, "@@ -1,1 +1,1 @@");
        assert_eq!(hunks[1].0, "@@ -5,1 +5,1 @@");
    }

    #[test]
    fn split_hunks_of_a_diff_with_no_headers_is_empty() {
        assert!(split_hunks("no hunk headers here").is_empty());
    }

    #[test]
    fn prepare_file_diff_concatenates_every_hunk_in_order() {
        let diff = "@@ -1,1 +1,1 @@\n+first\n@@ -10,1 +10,1 @@\n+second";
        let prepared = prepare_file_diff_for_review(diff, "src/main.rs").unwrap();
        assert_eq!(prepared.lines.len(), 2);
        assert_eq!(prepared.lines[0].line_number, 1);
        assert_eq!(prepared.lines[1].line_number, 10);
        assert!(prepared.code_without_lines.contains("first"));
        assert!(prepared.code_without_lines.contains("second"));
    }
}
