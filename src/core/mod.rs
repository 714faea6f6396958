//! Core domain models for the engine

pub mod config;
pub mod context;
pub mod message;
pub mod schedule;
pub mod step;

pub use config::EngineConfig;
pub use context::{PipelineContext, RunStatus};
pub use message::{Message, MessageSpec, Priority};
pub use schedule::{Schedule, ScheduleType, ScheduleUpdate};
pub use step::{Capability, PipelineStep, StepMetrics, StepStatus};
