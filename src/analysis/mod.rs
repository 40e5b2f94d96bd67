//! Chunk analysis: how scanned files become scheduled tasks and how the
//! answers are folded back together.

pub mod chunker;
pub mod merge;
pub mod processor;
pub mod prompt;

pub use chunker::build_chunks;
pub use merge::CategoryMerger;
pub use processor::{Dispatch, LlmChunkProcessor};
