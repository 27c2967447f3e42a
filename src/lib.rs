pub mod core;
pub mod edgar;
pub mod extract;
pub mod pipeline;
pub mod utils;

// Re-exports
pub use crate::core::config::ExtractorConfig;
pub use crate::core::error::{PipelineError, UnitError};
pub use crate::core::types::{ExtractRequest, ExtractionResult, ProgressEvent, StreamEvent};
pub use pipeline::{Orchestrator, PipelineConfig, ProgressSink, RunSummary};
pub use utils::progress::ProgressTracker;
