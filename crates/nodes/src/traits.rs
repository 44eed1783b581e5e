//! The `ExecutableNode` trait: the contract every node must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::NodeError;

/// One record flowing through the pipeline.
///
/// Items are created upstream and are read-only for every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Position of the item in the batch the node received.
    pub index: usize,
    /// Opaque payload.
    pub json: Value,
}

impl Item {
    /// Number a sequence of payloads in arrival order.
    pub fn batch(payloads: impl IntoIterator<Item = Value>) -> Vec<Item> {
        payloads
            .into_iter()
            .enumerate()
            .map(|(index, json)| Item { index, json })
            .collect()
    }
}

/// One record emitted by a node, with the input items it derives from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub json: Value,
    pub paired_item: Vec<usize>,
}

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the host and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: uuid::Uuid,
    /// ID of the current execution run.
    pub execution_id: uuid::Uuid,
    /// The node's configured parameters, before per-item resolution.
    pub parameters: Map<String, Value>,
    /// Decrypted secrets scoped to this node's credentials.
    pub secrets: HashMap<String, String>,
    /// Convert a failure into an error record instead of failing the run.
    pub continue_on_fail: bool,
}

/// The core node trait.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node over the previous node's output items and return
    /// this node's output items.
    async fn execute(
        &self,
        items: Vec<Item>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<OutputItem>, NodeError>;
}
