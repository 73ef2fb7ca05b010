//! Document side of an alignment pair

use serde::{Deserialize, Serialize};

/// Source (`from`) or target (`to`) document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSide {
    From,
    To,
}

impl DocumentSide {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "from" => Some(DocumentSide::From),
            "to" => Some(DocumentSide::To),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentSide::From => "from",
            DocumentSide::To => "to",
        }
    }
}
