//! The notification engine turns relay events into queued push
//! notifications.

pub mod aggregator;
pub mod error;
pub mod extractor;
pub mod pipeline;

pub use aggregator::{AggregationOutcome, Aggregator, GateDecision, ReadyNotification};
pub use error::PipelineError;
pub use extractor::{Extraction, TriggerExtractor};
pub use pipeline::{AppPipeline, DispatchReport, ExtractionReport, Pipeline, TickReport};
