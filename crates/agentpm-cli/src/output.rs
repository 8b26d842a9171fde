use agentpm_core::xml::{self, XmlNode};
use agentpm_core::Report;
use clap::ValueEnum;
use serde_json::{Map, Value};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
    Xml,
}

/// Write the report to stdout in the requested shape.
pub fn emit(report: &Report, format: Format) -> anyhow::Result<()> {
    let rendered = render(report, format)?;
    let mut out = std::io::stdout().lock();
    out.write_all(rendered.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// The `--format` given on a command line that clap rejected. Missing or
/// unreadable values fall back to text; the last occurrence wins.
pub fn requested_format<I, S>(args: I) -> Format
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut format = Format::Text;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let value = match arg.as_ref() {
            "--" => break,
            "--format" => args.next().map(|v| v.as_ref().to_string()),
            other => other.strip_prefix("--format=").map(str::to_string),
        };
        if let Some(parsed) = value.and_then(|v| Format::from_str(&v, true).ok()) {
            format = parsed;
        }
    }
    format
}

pub fn render(report: &Report, format: Format) -> anyhow::Result<String> {
    match format {
        Format::Text => Ok(render_text(report)),
        Format::Json => render_json(report),
        Format::Xml => render_xml(report),
    }
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn render_json(report: &Report) -> anyhow::Result<String> {
    let mut json = serde_json::to_string_pretty(&report.to_json())?;
    json.push('\n');
    Ok(json)
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

/// Scalars become attributes, objects become child elements, arrays become
/// a child element holding one element per item.
fn render_xml(report: &Report) -> anyhow::Result<String> {
    Ok(xml::to_string(&object_node(&report.variant, &report.fields))?)
}

fn object_node(name: &str, fields: &Map<String, Value>) -> XmlNode {
    fields.iter().fold(XmlNode::new(name), |node, (key, value)| match value {
        Value::Object(inner) => node.child(object_node(key, inner)),
        Value::Array(items) => node.child(array_node(key, items)),
        scalar => node.attr(key, scalar_text(scalar)),
    })
}

fn array_node(name: &str, items: &[Value]) -> XmlNode {
    let tag = singular(name);
    items.iter().fold(XmlNode::new(name), |node, item| {
        node.child(match item {
            Value::Object(inner) => object_node(tag, inner),
            Value::Array(inner) => array_node(tag, inner),
            scalar => {
                let mut leaf = XmlNode::new("item");
                leaf.text = scalar_text(scalar);
                leaf
            }
        })
    })
}

fn singular(plural: &str) -> &str {
    match plural.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem,
        _ => "item",
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

fn render_text(report: &Report) -> String {
    let mut lines = vec![report.message().to_string()];
    for (key, value) in report.fields.iter().filter(|(k, _)| *k != "message") {
        text_field(&mut lines, key, value, 0);
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn text_field(lines: &mut Vec<String>, key: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Null => {}
        Value::Object(map) => {
            lines.push(format!("{indent}{key}:"));
            for (k, v) in map {
                text_field(lines, k, v, depth + 1);
            }
        }
        Value::Array(items) if items.is_empty() => lines.push(format!("{indent}{key}: (none)")),
        Value::Array(items) => {
            lines.push(format!("{indent}{key}:"));
            lines.extend(items.iter().map(|item| format!("{indent}  - {}", inline(item))));
        }
        scalar => lines.push(format!("{indent}{key}: {}", scalar_text(scalar))),
    }
}

/// One list item on a single line: `key=value` pairs for objects.
fn inline(item: &Value) -> String {
    match item {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| format!("{k}={}", inline_value(v)))
            .collect::<Vec<_>>()
            .join(" "),
        other => scalar_text(other),
    }
}

fn inline_value(value: &Value) -> String {
    match value {
        Value::String(s) if s.contains(char::is_whitespace) => format!("{s:?}"),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        scalar => scalar_text(scalar),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
