//! Intent extraction, intent-to-signal planning, and command execution.

pub mod error;
pub mod executor;
pub mod mapping;
pub mod nlu;
pub mod rasa;
pub mod rules;

pub use error::{NluError, PlanError};
pub use executor::CommandExecutor;
pub use mapping::{ActionPlanner, Mapping, MappingPlanner};
pub use nlu::{IntentEngine, NluRegistry, TextOutcome};
