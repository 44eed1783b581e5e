//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The host uses the variant to decide retry behaviour:
/// - `Retryable`: nothing was applied yet; the node may be re-run.
/// - `Fatal`: the execution is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the host may re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
