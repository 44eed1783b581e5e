use serde_json::{json, Map, Value};

/// What a successful batch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultBatch {
    /// One aggregate value.  `find`/`aggregate` use `{}` for "no rows".
    Single(Value),
    /// An ordered sequence of records.
    Documents(Vec<Value>),
}

impl ResultBatch {
    /// `find`/`aggregate` results: `{}` when nothing matched.
    pub fn rows(documents: Vec<Value>) -> Self {
        if documents.is_empty() {
            Self::Single(Value::Object(Map::new()))
        } else {
            Self::Documents(documents)
        }
    }

    pub fn into_records(self) -> Vec<Value> {
        match self {
            Self::Single(value) => vec![value],
            Self::Documents(documents) => documents,
        }
    }
}

/// Result of one node invocation: data or a single error record, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(ResultBatch),
    Failure { message: String },
}

impl ExecutionOutcome {
    /// Flatten into output records; a failure becomes `[{ "error": .. }]`.
    pub fn into_records(self) -> Vec<Value> {
        match self {
            Self::Success(batch) => batch.into_records(),
            Self::Failure { message } => vec![json!({ "error": message })],
        }
    }
}
