//! Normalization and syntactic validation of generated HCL.
//!
//! Rendering concatenates fragments from many sources with arbitrary
//! indentation. [`format_hcl`] rewrites them into one canonical layout:
//!
//! - surrounding whitespace and blank lines are removed
//! - a block opened and closed on consecutive lines collapses to `{}` / `[]`
//! - the body is re-emitted by the `hcl` formatter (two-space indentation)
//! - each top-level block is followed by one blank line
//!
//! Leading comment lines are kept as a header above the formatted body.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::GenerateError;

static SURROUNDING_WS: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?m)^[ \t]+|[ \t]+$").expect("whitespace pattern is valid"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").expect("blank line pattern is valid"));
static EMPTY_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)\{\n\}$").expect("empty block pattern is valid"));
static EMPTY_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)\[\n\]$").expect("empty list pattern is valid"));
static EXTRA_BLANK_LINES: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line run pattern is valid"));
static TOP_LEVEL_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\}$").expect("closing brace pattern is valid"));

/// Split leading `#` / `//` comment lines from the rest of the text.
fn split_header(text: &str) -> (Vec<&str>, String) {
  let mut header = Vec::new();
  let mut lines = text.lines().peekable();
  while let Some(line) = lines.peek() {
    let trimmed = line.trim();
    if trimmed.starts_with('#') || trimmed.starts_with("//") {
      header.push(trimmed);
    } else if !trimmed.is_empty() {
      break;
    }
    lines.next();
  }
  let body: Vec<&str> = lines.collect();
  (header, body.join("\n"))
}

/// Whitespace normalization applied before the canonical formatter.
fn normalize(body: &str) -> String {
  let text = SURROUNDING_WS.replace_all(body, "");
  let text = BLANK_LINES.replace_all(text.trim(), "\n");
  let text = EMPTY_BLOCK.replace_all(&text, "{}");
  EMPTY_LIST.replace_all(&text, "[]").into_owned()
}

/// Normalize generated HCL text.
///
/// Text that does not parse is returned normalized but not re-indented, so
/// that it can still be written and reported by [`validate_hcl`].
pub fn format_hcl(text: &str) -> String {
  let (header, body) = split_header(text);
  let normalized = normalize(&body);

  let formatted = match hcl::parse(&normalized).and_then(|body| hcl::format::to_string(&body)) {
    Ok(formatted) => formatted,
    Err(e) => {
      debug!(error = %e, "leaving unparsable output unformatted");
      normalized
    }
  };

  let separated = TOP_LEVEL_CLOSE.replace_all(&formatted, "}\n");
  let separated = EXTRA_BLANK_LINES.replace_all(&separated, "\n\n");

  let mut result = String::new();
  for line in header {
    result.push_str(line);
    result.push('\n');
  }
  result.push_str(separated.trim_end());
  result.push('\n');
  result
}

/// Check that text parses as HCL.
pub fn validate_hcl(text: &str) -> Result<(), GenerateError> {
  hcl::parse(text)
    .map(|_| ())
    .map_err(|e| GenerateError::InvalidOutput { message: e.to_string() })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reindents_and_separates_blocks() {
    let input = "   terraform {\n  backend \"local\" {\n      path = \"x\"\n}\n}\n\n\nmodule \"a\" {\nsource = \"./a\"\n}\n";
    let expected = "terraform {\n  backend \"local\" {\n    path = \"x\"\n  }\n}\n\nmodule \"a\" {\n  source = \"./a\"\n}\n";
    assert_eq!(format_hcl(input), expected);
  }

  #[test]
  fn collapses_empty_blocks() {
    let out = format_hcl("terraform {\nrequired_providers {\n}\n}\nlocals {\nlist = [\n]\n}\n");
    assert!(out.contains("  required_providers {}\n"));
    assert!(out.contains("  list = []\n"));
  }

  #[test]
  fn block_comments_do_not_shift_indentation() {
    let input = "locals {\n/* { */\nx = 1\n}\nmodule \"a\" {\nsource = \"b\"\n}\n";
    let out = format_hcl(input);
    assert!(out.starts_with("locals {\n  x = 1\n}\n"));
    assert!(out.contains("}\n\nmodule \"a\" {\n  source = \"b\"\n}\n"));
  }

  #[test]
  fn brackets_inside_strings_are_preserved() {
    let input = "locals {\nx = \"{ not a block\"\ny = \"${lookup(var.m, \"}\")}\"\n}\n";
    let out = format_hcl(input);
    assert_eq!(hcl::parse(&out).unwrap(), hcl::parse(input).unwrap());
    assert!(out.contains("  x = \"{ not a block\"\n"));
  }

  #[test]
  fn header_comments_stay_on_top() {
    let input = "# generated\n# Site: eu\n   locals {\nx = 1\n}\n";
    assert_eq!(format_hcl(input), "# generated\n# Site: eu\nlocals {\n  x = 1\n}\n");
  }

  #[test]
  fn formatting_is_idempotent_and_preserves_meaning() {
    let input = "module \"a\" {\nvariables = {\nx = [1, 2]\n}\n}\noutput \"a\" {\nvalue = {\n}\n}\n";
    let once = format_hcl(input);
    assert_eq!(format_hcl(&once), once);
    assert_eq!(hcl::parse(&once).unwrap(), hcl::parse(input).unwrap());
  }

  #[test]
  fn unparsable_text_is_kept() {
    let out = format_hcl("resource \"x\" {\n   a = 1\n");
    assert_eq!(out, "resource \"x\" {\na = 1\n");
    assert!(validate_hcl(&out).is_err());
  }

  #[test]
  fn validate_accepts_formatted_output() {
    let text = format_hcl("module \"a\" {\nsource = \"./a\"\nvariables = {\nx = 1\n}\n}\n");
    assert!(validate_hcl(&text).is_ok());
  }

  #[test]
  fn validate_rejects_broken_output() {
    let err = validate_hcl("module \"a\" {\nsource = \n").unwrap_err();
    assert!(matches!(err, GenerateError::InvalidOutput { .. }));
  }
}
