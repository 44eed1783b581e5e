//! Executor error taxonomy.

use db::DbError;
use thiserror::Error;

use crate::mongodb::OperationKind;
use crate::NodeError;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A parameter is malformed JSON or has the wrong shape.
    #[error("invalid parameter '{parameter}' (item {item}): {message}")]
    Configuration {
        parameter: String,
        item: usize,
        message: String,
    },

    /// No database handle could be obtained.  Never converted into an
    /// error record.
    #[error("could not connect to MongoDB: {0}")]
    Connection(#[source] DbError),

    /// The store rejected a call.  `item` is `None` for batch-wide calls.
    #[error("{operation} failed: {source}")]
    Operation {
        operation: OperationKind,
        item: Option<usize>,
        #[source]
        source: DbError,
    },
}

impl ExecutorError {
    pub(crate) fn configuration(
        parameter: &str,
        item: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            parameter: parameter.to_owned(),
            item,
            message: message.into(),
        }
    }

    pub(crate) fn operation(operation: OperationKind, item: Option<usize>, source: DbError) -> Self {
        Self::Operation { operation, item, source }
    }

    /// The underlying parse or driver text, as reported in error records.
    pub fn message(&self) -> String {
        match self {
            Self::Configuration { message, .. } => message.clone(),
            Self::Connection(source) | Self::Operation { source, .. } => source.to_string(),
        }
    }

    /// Connection failures other than bad credentials happen before any
    /// write, so the node can safely be re-run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(DbError::Unreachable(_) | DbError::Mongo(_))
        )
    }
}

impl From<ExecutorError> for NodeError {
    fn from(err: ExecutorError) -> Self {
        if err.is_retryable() {
            NodeError::Retryable(err.to_string())
        } else {
            NodeError::Fatal(err.to_string())
        }
    }
}
