//! Оркестрация benchmark прогона поверх [`bench_worker::Worker`].

pub mod backlog;
pub mod error;
pub mod generator;
pub mod payload;
pub mod rate_control;
pub mod result;
pub mod sampler;

pub use backlog::BacklogPlan;
pub use error::EngineError;
pub use generator::WorkloadGenerator;
pub use rate_control::{Decision, RateControlConfig, RateController};
pub use result::{LatencySeries, LatencySummary, Quantile, TestResult};
pub use sampler::Sampler;
