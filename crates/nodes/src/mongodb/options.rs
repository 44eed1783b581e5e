//! `find`/`aggregate` query options.

use db::JsonDocument;
use serde::Serialize;
use serde_json::Value;

/// Default page size when `limit` is not configured.
pub const DEFAULT_LIMIT: u64 = 50;

/// Cursor window and ordering for one item's query.
///
/// `limit == 0` means unlimited, `skip == 0` means none, and `sort` is only
/// kept when it is a non-empty JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOptions {
    pub limit: u64,
    pub skip: u64,
    pub sort: Option<JsonDocument>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            skip: 0,
            sort: None,
        }
    }
}

impl QueryOptions {
    /// Parse the `options` parameter.  `None` and `null` yield the defaults.
    ///
    /// The error is the message to surface as a configuration error.
    pub fn parse(raw: Option<Value>) -> Result<Self, String> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::String(text)) => serde_json::from_str(&text).map_err(|e| e.to_string())?,
            Some(other) => other,
        };
        let Value::Object(fields) = raw else {
            return Err("options must be a JSON object".into());
        };

        Ok(Self {
            limit: count(fields.get("limit"), "limit")?.unwrap_or(DEFAULT_LIMIT),
            skip: count(fields.get("skip"), "skip")?.unwrap_or(0),
            sort: sort_spec(fields.get("sort"))?,
        })
    }
}

/// A non-negative integer given as a number or numeric text.
fn count(value: Option<&Value>, name: &str) -> Result<Option<u64>, String> {
    let invalid = || format!("{name} must be a non-negative integer");
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => Ok(Some(v)),
            (None, Some(f)) if f >= 0.0 && f.fract() == 0.0 => Ok(Some(f as u64)),
            _ => Err(invalid()),
        },
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

/// `sort` may be JSON text or an object.  Anything that is not a non-empty
/// object (an array, a scalar, `{}`) means "no sort".
fn sort_spec(value: Option<&Value>) -> Result<Option<JsonDocument>, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(Value::String(text)) => serde_json::from_str(text).map_err(|e| e.to_string())?,
        Some(other) => other.clone(),
    };
    match parsed {
        Value::Object(spec) if !spec.is_empty() => Ok(Some(spec)),
        _ => Ok(None),
    }
}
