// Module naming follows project convention (capitalised component modules)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Intake;
#[allow(non_snake_case)]
pub mod Channel;
#[allow(non_snake_case)]
mod Debug {
    pub mod StructDebug;
}

pub mod config;
pub mod errors;
pub mod pipeline;

pub use crate::Channel::set::{ChannelSet, ConsumerReport, ProducerReport};
pub use crate::Intake::queue::{IntakeQueue, Record};
pub use config::PipelineConfig;
pub use errors::{FormatError, PipelineError, Result, ValidationError};
pub use pipeline::{run_local, CollectingSink, Contains, PipelineReport, RecordPredicate, ResultSink};
