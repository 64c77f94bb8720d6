use serde::Serialize;
use serde_json::Value;

/// Render a serializable value as simple XML for use inside prompts.
///
/// Object fields become elements named after the field, sequence entries
/// become `<item>` elements, and nested values are indented two spaces.
/// With `root`, the whole value is wrapped in one more element. Field order
/// follows serialization order.
pub fn format_as_xml<T: Serialize>(value: &T, root: Option<&str>) -> serde_json::Result<String> {
    let value = serde_json::to_value(value)?;
    let mut lines = Vec::new();
    match root {
        Some(tag) => write_element(tag, &value, 0, &mut lines),
        None => write_children(&value, 0, &mut lines),
    }
    Ok(lines.join("\n"))
}

fn write_children(value: &Value, depth: usize, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_element(key, child, depth, lines);
            }
        }
        Value::Array(items) => {
            for item in items {
                write_element("item", item, depth, lines);
            }
        }
        scalar => lines.push(format!("{}{}", indent(depth), scalar_text(scalar))),
    }
}

fn write_element(tag: &str, value: &Value, depth: usize, lines: &mut Vec<String>) {
    let pad = indent(depth);
    match value {
        Value::Object(_) | Value::Array(_) => {
            lines.push(format!("{}<{}>", pad, tag));
            write_children(value, depth + 1, lines);
            lines.push(format!("{}</{}>", pad, tag));
        }
        scalar => lines.push(format!("{}<{}>{}</{}>", pad, tag, scalar_text(scalar), tag)),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => escape(s),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
