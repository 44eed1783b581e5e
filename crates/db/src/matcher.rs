//! Query evaluation for the in-memory store.
//!
//! Covers the subset of MongoDB semantics the workflow tests rely on:
//! equality and comparison filters, `$and`/`$or`/`$nor`, multi-key sorts,
//! and the `$set`/`$unset`/`$inc` update operators.  Anything else is
//! rejected with the message the server would give.

use std::cmp::Ordering;

use serde_json::Value;

use crate::{DbError, JsonDocument};

/// Resolve a dotted path such as `address.city`.
pub(crate) fn lookup<'a>(doc: &'a JsonDocument, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

pub(crate) fn matches(doc: &JsonDocument, filter: &JsonDocument) -> Result<bool, DbError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => all_of(doc, condition, key)?.iter().all(|m| *m),
            "$or" => all_of(doc, condition, key)?.iter().any(|m| *m),
            "$nor" => !all_of(doc, condition, key)?.iter().any(|m| *m),
            op if op.starts_with('$') => {
                return Err(DbError::Query(format!("unknown top level operator: {op}")));
            }
            path => matches_field(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn all_of(doc: &JsonDocument, clauses: &Value, op: &str) -> Result<Vec<bool>, DbError> {
    let clauses = match clauses {
        Value::Array(items) if !items.is_empty() => items,
        _ => return Err(DbError::Query(format!("{op} must be a nonempty array"))),
    };
    clauses
        .iter()
        .map(|clause| match clause {
            Value::Object(filter) => matches(doc, filter),
            _ => Err(DbError::Query(format!("{op} argument's entries must be objects"))),
        })
        .collect()
}

fn is_operator_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_field(value: Option<&Value>, condition: &Value) -> Result<bool, DbError> {
    let Value::Object(operators) = condition else {
        return Ok(equals(value, condition));
    };
    if !is_operator_object(condition) {
        return Ok(equals(value, condition));
    }

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => equals(value, operand),
            "$ne" => !equals(value, operand),
            "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
            "$gte" => ordered(value, operand, |o| o != Ordering::Less),
            "$lt" => ordered(value, operand, |o| o == Ordering::Less),
            "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
            "$in" => in_list(value, operand, op)?,
            "$nin" => !in_list(value, operand, op)?,
            "$exists" => value.is_some() == truthy(operand),
            other => return Err(DbError::Query(format!("unknown operator: {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Equality with MongoDB's array semantics: an array field matches when the
/// whole array or any element equals the operand.  A missing field equals
/// `null`.
fn equals(value: Option<&Value>, operand: &Value) -> bool {
    match value {
        None => operand.is_null(),
        Some(Value::Array(items)) if !operand.is_array() => {
            items.iter().any(|item| compare(item, operand) == Ordering::Equal)
        }
        Some(v) => compare(v, operand) == Ordering::Equal,
    }
}

fn ordered(value: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match value {
        Some(v) if type_rank(v) == type_rank(operand) => accept(compare(v, operand)),
        _ => false,
    }
}

fn in_list(value: Option<&Value>, operand: &Value, op: &str) -> Result<bool, DbError> {
    match operand {
        Value::Array(candidates) => Ok(candidates.iter().any(|c| equals(value, c))),
        _ => Err(DbError::Query(format!("{op} needs an array"))),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order across JSON values following MongoDB's type bracketing.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare(lv, rv)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Stable multi-key sort.  Directions must be `1` or `-1`.
pub(crate) fn sort_documents(docs: &mut [JsonDocument], spec: &JsonDocument) -> Result<(), DbError> {
    let mut keys = Vec::with_capacity(spec.len());
    for (path, direction) in spec {
        let descending = match direction.as_i64() {
            Some(1) => false,
            Some(-1) => true,
            _ => {
                return Err(DbError::Query(format!(
                    "$sort key ordering must be 1 (for ascending) or -1 (for descending), got {direction} for '{path}'"
                )))
            }
        };
        keys.push((path.as_str(), descending));
    }

    docs.sort_by(|a, b| {
        keys.iter()
            .map(|(path, descending)| {
                let l = lookup(a, path).unwrap_or(&Value::Null);
                let r = lookup(b, path).unwrap_or(&Value::Null);
                let ord = compare(l, r);
                if *descending { ord.reverse() } else { ord }
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Apply an update-operator document; returns whether the document changed.
pub(crate) fn apply_update(doc: &mut JsonDocument, update: &JsonDocument) -> Result<bool, DbError> {
    if update.is_empty() || !update.keys().all(|k| k.starts_with('$')) {
        return Err(DbError::Query("update document requires atomic operators".into()));
    }

    let before = doc.clone();
    for (op, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(DbError::Query(format!(
                "Modifiers operate on fields but we found type {} instead",
                type_name(fields)
            )));
        };
        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(doc, path);
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    let current = lookup(doc, path).cloned().unwrap_or(Value::from(0));
                    set_path(doc, path, add(&current, delta, path)?);
                }
            }
            other => {
                return Err(DbError::Query(format!(
                    "Unknown modifier: {other}. Expected a valid update modifier or pipeline-style update specified as an array"
                )))
            }
        }
    }
    Ok(*doc != before)
}

/// Apply a pipeline-style update made of `$set`/`$addFields`/`$unset` stages.
pub(crate) fn apply_pipeline_update(
    doc: &mut JsonDocument,
    stages: &[JsonDocument],
) -> Result<bool, DbError> {
    let before = doc.clone();
    for stage in stages {
        let (name, body) = single_stage(stage)?;
        match (name, body) {
            ("$set" | "$addFields", Value::Object(fields)) => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone());
                }
            }
            ("$unset", Value::String(path)) => unset_path(doc, path),
            ("$unset", Value::Array(paths)) => {
                for path in paths.iter().filter_map(Value::as_str) {
                    unset_path(doc, path);
                }
            }
            (other, _) => {
                return Err(DbError::Query(format!(
                    "{other} is not allowed to be used within an update"
                )))
            }
        }
    }
    Ok(*doc != before)
}

pub(crate) fn single_stage(stage: &JsonDocument) -> Result<(&str, &Value), DbError> {
    let mut entries = stage.iter();
    match (entries.next(), entries.next()) {
        (Some((name, body)), None) => Ok((name.as_str(), body)),
        _ => Err(DbError::Query(
            "A pipeline stage specification object must contain exactly one field.".into(),
        )),
    }
}

fn add(current: &Value, delta: &Value, path: &str) -> Result<Value, DbError> {
    match (current, delta) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.checked_add(y).map(Value::from).ok_or_else(|| {
                DbError::Query(format!(
                    "Failed to apply $inc operations to current value ((NumberLong){x}) for field '{path}': integer overflow"
                ))
            }),
            _ => {
                let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
                serde_json::Number::from_f64(sum).map(Value::Number).ok_or_else(|| {
                    DbError::Query(format!("$inc on field '{path}' produced a non-finite number"))
                })
            }
        },
        _ => Err(DbError::Query(format!(
            "Cannot apply $inc to a value of non-numeric type. {{_id: ...}} has the field '{path}' of non-numeric type {}",
            type_name(current)
        ))),
    }
}

fn set_path(doc: &mut JsonDocument, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return };

    let mut current = doc;
    for part in parts {
        let entry = current
            .entry(part.to_owned())
            .or_insert_with(|| Value::Object(JsonDocument::new()));
        if !entry.is_object() {
            *entry = Value::Object(JsonDocument::new());
        }
        let Value::Object(next) = entry else { return };
        current = next;
    }
    current.insert(last.to_owned(), value);
}

fn unset_path(doc: &mut JsonDocument, path: &str) {
    match path.rsplit_once('.') {
        None => {
            doc.remove(path);
        }
        Some((parent, last)) => {
            let mut current = &mut *doc;
            for part in parent.split('.') {
                match current.get_mut(part) {
                    Some(Value::Object(next)) => current = next,
                    _ => return,
                }
            }
            current.remove(last);
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
