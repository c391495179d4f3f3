//
// manifest.rs
//
// Conversion between evaluated values and JSON, plus the JSON printers
//

use std::rc::Rc;

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::EvalResult;
use crate::eval::{runtime, Evaluator};
use crate::value::Value;

/// Integral numbers below this magnitude are emitted without a fraction.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

pub(crate) fn number_to_json(n: f64) -> EvalResult<JsonValue> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Ok(JsonValue::from(n as i64));
    }
    Number::from_f64(n)
        .map(JsonValue::Number)
        .ok_or_else(|| runtime(format!("cannot manifest {n} as JSON")))
}

impl<'vm> Evaluator<'vm> {
    /// Fully forces `value`, dropping hidden fields.
    pub(crate) fn manifest(&mut self, value: &Value) -> EvalResult<JsonValue> {
        match value {
            Value::Null => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => Ok(JsonValue::String(s.to_string())),
            Value::Array(items) => {
                let items = items.clone();
                let mut out = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let v = self.force(*item)?;
                    out.push(self.manifest(&v)?);
                }
                Ok(JsonValue::Array(out))
            }
            Value::Object(obj) => {
                let mut out = Map::new();
                for name in self.object_fields(*obj, false) {
                    let v = self.object_field(*obj, &name)?;
                    out.insert(name.to_string(), self.manifest(&v)?);
                }
                Ok(JsonValue::Object(out))
            }
            Value::Function(_) => Err(runtime("couldn't manifest function as JSON")),
        }
    }

    pub(crate) fn from_json(&mut self, json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Value::string(s),
            JsonValue::Array(items) => {
                let thunks = items
                    .iter()
                    .map(|item| {
                        let v = self.from_json(item);
                        self.ready(v)
                    })
                    .collect();
                Value::Array(Rc::new(thunks))
            }
            JsonValue::Object(map) => {
                let entries: Vec<(Rc<str>, Value)> = map
                    .iter()
                    .map(|(k, v)| (Rc::from(k.as_str()), self.from_json(v)))
                    .collect();
                Value::Object(self.object_from_values(entries))
            }
        }
    }

    /// `std.toString`: strings unchanged, everything else as compact JSON.
    pub(crate) fn to_display_string(&mut self, value: &Value) -> EvalResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other => {
                let json = self.manifest(other)?;
                Ok(to_compact(&json))
            }
        }
    }
}

pub fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

fn number_text(n: &Number) -> String {
    n.to_string()
}

/// Single-line JSON with a space after `:` and `,`.
pub fn to_compact(value: &JsonValue) -> String {
    let mut out = String::new();
    write_compact(value, &mut out);
    out
}

fn write_compact(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        JsonValue::Number(n) => out.push_str(&number_text(n)),
        JsonValue::String(s) => out.push_str(&quote(s)),
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_compact(item, out);
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote(k));
                out.push_str(": ");
                write_compact(v, out);
            }
            out.push('}');
        }
    }
}

/// Multi-line JSON. Empty containers print as `[ ]` and `{ }`.
pub fn to_pretty(value: &JsonValue, indent: &str, newline: &str, key_sep: &str) -> String {
    let mut out = String::new();
    write_pretty(value, indent, newline, key_sep, "", &mut out);
    out
}

fn write_pretty(
    value: &JsonValue,
    indent: &str,
    newline: &str,
    key_sep: &str,
    current: &str,
    out: &mut String,
) {
    let inner = format!("{current}{indent}");
    match value {
        JsonValue::Array(items) if items.is_empty() => out.push_str("[ ]"),
        JsonValue::Object(map) if map.is_empty() => out.push_str("{ }"),
        JsonValue::Array(items) => {
            out.push('[');
            out.push_str(newline);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    out.push_str(newline);
                }
                out.push_str(&inner);
                write_pretty(item, indent, newline, key_sep, &inner, out);
            }
            out.push_str(newline);
            out.push_str(current);
            out.push(']');
        }
        JsonValue::Object(map) => {
            out.push('{');
            out.push_str(newline);
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    out.push_str(newline);
                }
                out.push_str(&inner);
                out.push_str(&quote(k));
                out.push_str(key_sep);
                write_pretty(v, indent, newline, key_sep, &inner, out);
            }
            out.push_str(newline);
            out.push_str(current);
            out.push('}');
        }
        other => write_compact(other, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compact_spacing() {
        let value = json!({"a": 1, "b": [true, null, "x"]});
        assert_eq!(to_compact(&value), r#"{"a": 1, "b": [true, null, "x"]}"#);
    }

    #[test]
    fn test_pretty_uses_jsonnet_layout() {
        let value = json!({"a": {"b": []}, "c": {}});
        let expected = "{\n   \"a\": {\n      \"b\": [ ]\n   },\n   \"c\": { }\n}";
        assert_eq!(to_pretty(&value, "   ", "\n", ": "), expected);
    }

    #[test]
    fn test_integral_numbers_have_no_fraction() {
        assert_eq!(number_to_json(3.0).unwrap(), json!(3));
        assert_eq!(number_to_json(-0.5).unwrap(), json!(-0.5));
        assert!(number_to_json(f64::INFINITY).is_err());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\n"), r#""a\"b\n""#);
    }
}
