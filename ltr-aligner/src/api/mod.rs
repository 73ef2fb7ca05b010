//! HTTP API handlers for ltr-aligner

pub mod alignments;
pub mod health;
pub mod sse;

pub use alignments::alignment_routes;
pub use health::health_routes;
pub use sse::event_stream;
