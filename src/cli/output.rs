//! Output formatting for CLI commands.

use serde::Serialize;
use serde_json::Value;

use crate::cli::args::{OutputFormat, QuiverArgs};
use crate::error::Result;

/// Output a result in the selected format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &QuiverArgs) -> Result<()> {
    let value = serde_json::to_value(result)?;
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 0 && !message.is_empty() {
                println!("{message}");
            }
            print!("{}", render_human(&value));
            Ok(())
        }
        OutputFormat::Json => {
            let text = if args.pretty {
                serde_json::to_string_pretty(&value)?
            } else {
                serde_json::to_string(&value)?
            };
            println!("{text}");
            Ok(())
        }
    }
}

/// Render a JSON value as indented `key: value` lines. Arrays of objects are
/// printed as numbered blocks.
pub fn render_human(value: &Value) -> String {
    let mut out = String::new();
    render_into(value, 0, &mut out);
    out
}

fn render_into(value: &Value, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                if is_scalar(value) || is_scalar_array(value) {
                    out.push_str(&format!("{indent}{key}: {}\n", scalar_text(value)));
                } else {
                    out.push_str(&format!("{indent}{key}:\n"));
                    render_into(value, depth + 1, out);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if is_scalar(item) {
                    out.push_str(&format!("{indent}- {}\n", scalar_text(item)));
                } else {
                    out.push_str(&format!("{indent}[{}]\n", i + 1));
                    render_into(item, depth + 1, out);
                }
            }
        }
        scalar => out.push_str(&format!("{indent}{}\n", scalar_text(scalar))),
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn is_scalar_array(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.iter().all(is_scalar))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.4}"),
            _ => n.to_string(),
        },
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(scalar_text).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_nested() {
        let value = serde_json::json!({
            "hits": [{"key": "a", "distance": 0.5}],
            "count": 1,
            "vector": [1.0, 2.0]
        });
        let text = render_human(&value);
        assert!(text.contains("count: 1\n"));
        assert!(text.contains("hits:\n  [1]\n    distance: 0.5000\n    key: a\n"));
        assert!(text.contains("vector: [1.0000, 2.0000]\n"));
    }

    #[test]
    fn test_render_empty_and_null() {
        assert_eq!(render_human(&serde_json::json!({"next": null})), "next: -\n");
        assert_eq!(render_human(&serde_json::json!([])), "");
    }
}
