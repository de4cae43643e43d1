use serde::{Deserialize, Serialize};
use std::fmt;

/// Endpoint identifier of the Doubao model the portfolio chat was built against.
pub const DEFAULT_MODEL: &str = "doubao-seed-1-8-251228";

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        ModelId(s.to_string())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        ModelId(DEFAULT_MODEL.into())
    }
}
