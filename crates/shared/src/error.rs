use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a submission ended on the failure path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The server answered with a status of 400 or above.
    Rejected { status: u16 },
    /// The server declared a JSON body that could not be parsed.
    MalformedBody { status: u16 },
    /// No response was received.
    Transport { message: String },
}

impl FailureKind {
    pub fn status(&self) -> Option<u16> {
        match self {
            FailureKind::Rejected { status } | FailureKind::MalformedBody { status } => {
                Some(*status)
            }
            FailureKind::Transport { .. } => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, FailureKind::Transport { .. })
    }
}

#[derive(Debug, Error)]
#[error("unsupported http method: {0}")]
pub struct MethodParseError(pub String);

#[derive(Debug, Error)]
pub enum OptionsParseError {
    #[error("options attribute is not a valid JSON object: {0}")]
    Json(#[source] serde_json::Error),
}
