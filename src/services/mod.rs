//! Settlement services: the pure engine stages and the stateful pipeline

pub mod consensus;
pub mod normalizer;
pub mod orchestrator;
pub mod outcome_sink;
pub mod pipeline;
pub mod pricing;
pub mod rate_limiter;
pub mod registry;
pub mod transaction;

pub use orchestrator::{SettlementContext, SettlementOrchestrator};
