//! Patient care journey orchestration: validation, condition evaluation,
//! node execution, and a durable, resumable run engine.

pub mod channel;
pub mod demo;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod state_machine;
pub mod store;
pub mod validator;

pub use channel::{LogChannel, MessageChannel, RecordingChannel};
pub use engine::JourneyEngine;
pub use evaluator::ConditionEvaluator;
pub use executor::NodeExecutor;
pub use store::{JourneyStore, MemoryStore, RunStore};
pub use validator::{parse_journey_draft, parse_patient_context, validate_draft};
