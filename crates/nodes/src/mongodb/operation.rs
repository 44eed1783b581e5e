use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of operations the node supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Aggregate,
    DeleteOne,
    Find,
    Insert,
    ReplaceOne,
    Update,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        Self::Aggregate,
        Self::DeleteOne,
        Self::Find,
        Self::Insert,
        Self::ReplaceOne,
        Self::Update,
    ];

    /// Parameter value naming this operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate",
            Self::DeleteOne => "deleteOne",
            Self::Find => "find",
            Self::Insert => "insert",
            Self::ReplaceOne => "replaceOne",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown operation '{s}', expected one of: {}",
                    Self::ALL.map(Self::as_str).join(", ")
                )
            })
    }
}
