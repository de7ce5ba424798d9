//! Serialization of variables and secrets into HCL.

use std::sync::LazyLock;

use hcl::Expression;
use regex::Regex;

use super::GenerateError;
use crate::config::{ComponentRef, Segment, Value, Variables, segments};

static BARE_KEY: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("bare key pattern is valid"));

/// Quote a string literal, escaping quotes, control characters and
/// template markers (`${` becomes `$${`).
pub fn quote(s: &str) -> String {
  hcl::format::to_string(&Expression::from(s)).expect("formatting a string literal cannot fail")
}

/// Escape literal text for use inside an HCL quoted template.
pub fn escape(s: &str) -> String {
  let quoted = quote(s);
  quoted[1..quoted.len() - 1].to_string()
}

fn key(k: &str) -> String {
  if BARE_KEY.is_match(k) { k.to_string() } else { quote(k) }
}

/// Render a value as an HCL expression. `resolve` turns references into expressions.
pub fn render_value<F>(value: &Value, resolve: &F) -> Result<String, GenerateError>
where
  F: Fn(&ComponentRef) -> Result<String, GenerateError>,
{
  Ok(match value {
    Value::Null => "null".to_string(),
    Value::Boolean(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    Value::String(s) => render_string(s, resolve)?,
    Value::Array(items) => {
      let rendered = items
        .iter()
        .map(|item| render_value(item, resolve))
        .collect::<Result<Vec<_>, _>>()?;
      format!("[{}]", rendered.join(", "))
    }
    Value::Table(map) => {
      if map.is_empty() {
        return Ok("{}".to_string());
      }
      let mut out = String::from("{\n");
      for (k, v) in map {
        out.push_str(&format!("{} = {}\n", key(k), render_value(v, resolve)?));
      }
      out.push('}');
      out
    }
  })
}

fn render_string<F>(s: &str, resolve: &F) -> Result<String, GenerateError>
where
  F: Fn(&ComponentRef) -> Result<String, GenerateError>,
{
  let parts = segments(s)?;
  if let [Segment::Reference(r)] = parts.as_slice() {
    return resolve(r);
  }

  let mut out = String::from("\"");
  for part in &parts {
    match part {
      Segment::Literal(text) => out.push_str(&escape(text)),
      Segment::Reference(r) => {
        out.push_str("${");
        out.push_str(&resolve(r)?);
        out.push('}');
      }
    }
  }
  out.push('"');
  Ok(out)
}

/// Render `name = { ... }` for a variables or secrets map.
pub fn serialize_block<F>(name: &str, variables: &Variables, resolve: &F) -> Result<String, GenerateError>
where
  F: Fn(&ComponentRef) -> Result<String, GenerateError>,
{
  if variables.is_empty() {
    return Ok(format!("{name} = {{}}\n"));
  }
  let mut out = format!("{name} = {{\n");
  for (k, v) in variables {
    out.push_str(&format!("{} = {}\n", key(k), render_value(v, resolve)?));
  }
  out.push_str("}\n");
  Ok(out)
}
