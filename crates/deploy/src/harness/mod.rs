//! Integration test harness: scripted multi-actor scenarios against a local chain.

mod chain;
mod runner;
mod scenario;

pub use chain::{ChainSource, LocalChain};
pub use runner::{ActionRecord, Outcome, QueryResult, ScenarioReport, ScenarioRunner};
pub use scenario::{Action, EPOCH_SECONDS, Expect, MAX_ADVANCE_WEEKS, RepeatMode, Scenario};
