// src/pipeline/mod.rs

pub mod driver;
pub mod metrics;

pub use driver::PipelineDriver;
pub use metrics::{MetricsSummary, PipelineMetrics};
