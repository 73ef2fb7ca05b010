//! Run requests accepted by the batch processor

use serde::{Deserialize, Serialize};

/// Which batches an align run should process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchSelection {
    /// Every batch; restarts the displayed batch counter
    All,
    /// `n` batches following the highest committed one
    Next(u32),
    /// Caller-chosen batch ids
    Explicit(Vec<u32>),
}

/// Which batches a resolve run should process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveSelection {
    /// One item covering the whole document
    WholeDocument,
    Batches(Vec<u32>),
}

/// Parameters shared by every batch of an align run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignParams {
    pub shift: i64,
    pub window: u32,
    pub use_proxy_from: bool,
    pub use_proxy_to: bool,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            shift: 0,
            window: 50,
            use_proxy_from: false,
            use_proxy_to: false,
        }
    }
}

/// Parameters shared by every item of a resolve run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveParams {
    pub handle_start: bool,
    pub handle_finish: bool,
    pub use_proxy_from: bool,
    pub use_proxy_to: bool,
}

/// Unit of work submitted to the batch processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunRequest {
    Align {
        selection: BatchSelection,
        params: AlignParams,
    },
    Resolve {
        selection: ResolveSelection,
        params: ResolveParams,
    },
}

/// Run mode, as reported in events and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Align,
    Resolve,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Align => "align",
            RunMode::Resolve => "resolve",
        }
    }
}

impl RunRequest {
    pub fn mode(&self) -> RunMode {
        match self {
            RunRequest::Align { .. } => RunMode::Align,
            RunRequest::Resolve { .. } => RunMode::Resolve,
        }
    }
}
