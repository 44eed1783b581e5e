//! Dry-run resolution of per-item requests.

use serde::Serialize;
use serde_json::{json, Value};

use db::UpdateModel;

use crate::mongodb::params::{ItemParams, DOCUMENT, QUERY};
use crate::mongodb::{ExecutorError, OperationKind, ParameterResolver};

/// The fully resolved parameters of one item's call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRequest {
    pub index: usize,
    pub collection: String,
    /// Filter document, or the pipeline for `aggregate`.  `null` for
    /// `insert`.
    pub query: Value,
    /// Query options, document, or update and update options.
    pub payload: Value,
}

/// Resolve every item's request without touching a database.
///
/// Resolution follows the executor exactly, including `insert` taking its
/// collection from the first item.  The first configuration error wins.
pub fn plan(
    operation: OperationKind,
    item_count: usize,
    params: &dyn ParameterResolver,
) -> Result<Vec<OperationRequest>, ExecutorError> {
    let insert_collection = match (operation, item_count) {
        (OperationKind::Insert, n) if n > 0 => Some(ItemParams::new(params, 0).collection()?),
        _ => None,
    };

    (0..item_count)
        .map(|index| {
            let p = ItemParams::new(params, index);
            let collection = match &insert_collection {
                Some(name) => name.clone(),
                None => p.collection()?,
            };

            let (query, payload) = match operation {
                OperationKind::Find => (
                    Value::Object(p.object(QUERY)?),
                    to_value(p.query_options()?),
                ),
                OperationKind::Aggregate => (
                    Value::Array(p.pipeline()?.into_iter().map(Value::Object).collect()),
                    to_value(p.query_options()?),
                ),
                OperationKind::Insert => (Value::Null, Value::Object(p.object(DOCUMENT)?)),
                OperationKind::Update => {
                    let query = Value::Object(p.object(QUERY)?);
                    let update = match p.update()? {
                        UpdateModel::Document(doc) => Value::Object(doc),
                        UpdateModel::Pipeline(stages) => {
                            Value::Array(stages.into_iter().map(Value::Object).collect())
                        }
                    };
                    let options = to_value(p.update_settings()?);
                    (query, json!({ "update": update, "updateOptions": options }))
                }
                OperationKind::ReplaceOne => (
                    Value::Object(p.object(QUERY)?),
                    Value::Object(p.object(DOCUMENT)?),
                ),
                OperationKind::DeleteOne => (Value::Object(p.object(QUERY)?), Value::Null),
            };

            Ok(OperationRequest { index, collection, query, payload })
        })
        .collect()
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
