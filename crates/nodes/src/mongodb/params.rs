//! Per-item parameter resolution.
//!
//! A [`ParameterResolver`] yields a parameter's raw value for one item.
//! [`ItemParams`] layers the node's defaults and JSON decoding on top, so
//! handlers only ever see typed values or a configuration error.

use db::{JsonDocument, UpdateModel, UpdateSettings};
use serde_json::{Map, Value};

use crate::mongodb::{ExecutorError, OperationKind, QueryOptions};
use crate::Item;

pub const OPERATION: &str = "operation";
pub const COLLECTION: &str = "collection";
pub const QUERY: &str = "query";
pub const DOCUMENT: &str = "document";
pub const UPDATE: &str = "update";
pub const UPDATE_OPTIONS: &str = "updateOptions";
pub const OPTIONS: &str = "options";

/// Yields a named parameter's raw value resolved against one item.
///
/// Returning `Value::Null` means "not configured"; the node's default
/// applies.
pub trait ParameterResolver: Send + Sync {
    fn get(&self, name: &str, item_index: usize) -> Value;
}

/// Resolve the `operation` parameter.  It is read from the first item
/// only, and defaults to `find`.
pub fn resolve_operation(params: &dyn ParameterResolver) -> Result<OperationKind, ExecutorError> {
    match params.get(OPERATION, 0) {
        Value::Null => Ok(OperationKind::Find),
        Value::String(name) => name
            .trim()
            .parse()
            .map_err(|msg: String| ExecutorError::configuration(OPERATION, 0, msg)),
        other => Err(ExecutorError::configuration(
            OPERATION,
            0,
            format!("operation must be a string, got {other}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// NodeParameters
// ---------------------------------------------------------------------------

/// The node's configured parameters with `{{ .. }}` placeholders rendered
/// per item.
///
/// Supported expressions:
/// - `{{ $json }}`: the whole item payload.
/// - `{{ $json.path.to.field }}`: a field of the payload.
/// - `{{ $index }}`: the item's position.
///
/// A string consisting of exactly one placeholder takes the referenced
/// value as is; otherwise strings are interpolated (text raw, other values
/// as compact JSON, missing values as nothing).  Unknown expressions are
/// left untouched.
#[derive(Debug, Clone)]
pub struct NodeParameters {
    values: Map<String, Value>,
    items: Vec<Value>,
}

impl NodeParameters {
    pub fn new(values: Map<String, Value>, items: &[Item]) -> Self {
        Self {
            values,
            items: items.iter().map(|item| item.json.clone()).collect(),
        }
    }
}

impl ParameterResolver for NodeParameters {
    fn get(&self, name: &str, item_index: usize) -> Value {
        let Some(raw) = self.values.get(name) else {
            return Value::Null;
        };
        let item = self.items.get(item_index).unwrap_or(&Value::Null);
        render_value(raw, item, item_index)
    }
}

fn render_value(value: &Value, item: &Value, index: usize) -> Value {
    match value {
        Value::String(template) => render_string(template, item, index),
        Value::Array(values) => Value::Array(values.iter().map(|v| render_value(v, item, index)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), render_value(v, item, index)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(template: &str, item: &Value, index: usize) -> Value {
    // A lone placeholder keeps the referenced value's type.  Surrounding
    // text, whitespace included, makes it an interpolation.
    if let Some(inner) = template.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            if let Some(value) = evaluate(inner.trim(), item, index) {
                return value;
            }
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start..].find("}}") else { break };
        let expr = &rest[start + 2..start + len];
        out.push_str(&rest[..start]);
        match evaluate(expr.trim(), item, index) {
            Some(Value::String(s)) => out.push_str(&s),
            Some(Value::Null) => {}
            Some(other) => out.push_str(&other.to_string()),
            None => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    Value::String(out)
}

/// `None` for expressions this resolver does not understand.
fn evaluate(expr: &str, item: &Value, index: usize) -> Option<Value> {
    if expr == "$index" {
        return Some(Value::from(index));
    }
    let path = expr.strip_prefix("$json")?;
    if path.is_empty() {
        return Some(item.clone());
    }
    let path = path.strip_prefix('.')?;
    let mut current = item;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part),
            Value::Array(values) => part.parse::<usize>().ok().and_then(|i| values.get(i)),
            _ => None,
        }
        .unwrap_or(&Value::Null);
    }
    Some(current.clone())
}

// ---------------------------------------------------------------------------
// ItemParams
// ---------------------------------------------------------------------------

/// Typed access to one item's parameters.
pub(crate) struct ItemParams<'a> {
    resolver: &'a dyn ParameterResolver,
    index: usize,
}

impl<'a> ItemParams<'a> {
    pub(crate) fn new(resolver: &'a dyn ParameterResolver, index: usize) -> Self {
        Self { resolver, index }
    }

    fn raw(&self, name: &str) -> Option<Value> {
        match self.resolver.get(name, self.index) {
            Value::Null => None,
            value => Some(value),
        }
    }

    fn error(&self, name: &str, message: impl Into<String>) -> ExecutorError {
        ExecutorError::configuration(name, self.index, message)
    }

    /// Decode a JSON parameter.  Text is parsed; structured values pass
    /// through.  Absent parameters decode `default`.
    fn json(&self, name: &str, default: &str) -> Result<Value, ExecutorError> {
        let text = match self.raw(name) {
            None => default.to_owned(),
            Some(Value::String(text)) => text,
            Some(value) => return Ok(value),
        };
        serde_json::from_str(&text).map_err(|e| self.error(name, e.to_string()))
    }

    pub(crate) fn collection(&self) -> Result<String, ExecutorError> {
        match self.raw(COLLECTION) {
            Some(Value::String(name)) if !name.trim().is_empty() => Ok(name.trim().to_owned()),
            Some(Value::String(_)) | None => Err(self.error(COLLECTION, "collection name must not be empty")),
            Some(other) => Err(self.error(COLLECTION, format!("collection name must be a string, got {other}"))),
        }
    }

    /// A JSON-object parameter defaulting to `{}`.
    pub(crate) fn object(&self, name: &str) -> Result<JsonDocument, ExecutorError> {
        match self.json(name, "{}")? {
            Value::Object(doc) => Ok(doc),
            other => Err(self.error(name, format!("{name} must be a JSON object, got {other}"))),
        }
    }

    /// The `query` parameter of `aggregate`: an array of stage objects.
    pub(crate) fn pipeline(&self) -> Result<Vec<JsonDocument>, ExecutorError> {
        let stages = match self.json(QUERY, "[]")? {
            Value::Array(stages) => stages,
            other => {
                return Err(self.error(
                    QUERY,
                    format!("aggregation pipeline must be a JSON array of stages, got {other}"),
                ))
            }
        };
        stages
            .into_iter()
            .map(|stage| match stage {
                Value::Object(doc) => Ok(doc),
                other => Err(self.error(QUERY, format!("pipeline stage must be a JSON object, got {other}"))),
            })
            .collect()
    }

    /// The `update` parameter: an operator document or a pipeline array.
    pub(crate) fn update(&self) -> Result<UpdateModel, ExecutorError> {
        match self.json(UPDATE, "{}")? {
            Value::Object(doc) => Ok(UpdateModel::Document(doc)),
            Value::Array(stages) => stages
                .into_iter()
                .map(|stage| match stage {
                    Value::Object(doc) => Ok(doc),
                    other => Err(self.error(UPDATE, format!("update stage must be a JSON object, got {other}"))),
                })
                .collect::<Result<_, _>>()
                .map(UpdateModel::Pipeline),
            other => Err(self.error(UPDATE, format!("update must be a JSON object or array, got {other}"))),
        }
    }

    pub(crate) fn update_settings(&self) -> Result<UpdateSettings, ExecutorError> {
        let value = Value::Object(self.object(UPDATE_OPTIONS)?);
        serde_json::from_value(value).map_err(|e| self.error(UPDATE_OPTIONS, e.to_string()))
    }

    pub(crate) fn query_options(&self) -> Result<QueryOptions, ExecutorError> {
        QueryOptions::parse(self.raw(OPTIONS)).map_err(|msg| self.error(OPTIONS, msg))
    }
}
