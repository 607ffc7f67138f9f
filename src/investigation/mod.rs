//! Investigation engine.
//!
//! - [`types`]: the persisted case record and its closed enums
//! - [`store`]: evidence and hypothesis bookkeeping on [`InvestigationState`]
//! - [`lifecycle`]: the seven-phase state machine and its gates
//! - [`select_intensity`]: how much OODA work a phase gets
//! - [`detect_signal`]: deterministic incident detection
//! - [`OodaEngine`]: one Observe/Orient/Decide/Act iteration
//! - [`Orchestrator`]: per-case turn processing and persistence

mod detector;
mod intensity;
/// Phase rules, transitions and the closing record.
pub mod lifecycle;
mod memory;
mod ooda;
mod orchestrator;
mod store;
mod types;

pub use detector::*;
pub use intensity::*;
pub use lifecycle::{
    POST_MORTEM_MITIGATION_SKIP_REASON, POST_MORTEM_ROOT_CAUSE_THRESHOLD, RESOLVED_SKIP_REASON,
    ROOT_CAUSE_THRESHOLD,
};
pub use memory::*;
pub use ooda::*;
pub use orchestrator::*;
pub use store::{ClassificationOutcome, ANCHORING_THRESHOLD};
pub use types::*;
