#![forbid(unsafe_code)]

//! Core domain model and business logic for the Liftguide guided-session engine.
//!
//! This crate provides:
//! - Session value types (planned sets, plans, verdicts, outcomes)
//! - Double-progression decision and planning
//! - The session step model and hierarchical sequence
//! - The session state machine (navigation, flat/hierarchical mapping, edits)
//! - Superset assembly
//! - Calibration and auto-regulation subflows
//! - Resumption/refresh after interruption or regeneration
//! - Wall-clock timer service for timed sets and rests
//! - History and rolling-state persistence (JSONL + CSV archive)

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod equipment;
pub mod progression;
pub mod step;
pub mod sequence;
pub mod machine;
pub mod builder;
pub mod superset;
pub mod calibration;
pub mod resume;
pub mod timer;
pub mod history;
pub mod state;
pub mod rollup;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog};
pub use config::Config;
pub use equipment::{
    BarPlateCalculator, CalibrationHelper, PercentWarmupPlanner, PlateCalculator, RirLoadAdjuster,
    WarmupPlanner,
};
pub use progression::{
    decide_session, plan_deload_session, plan_next_session, plan_session, record_session_result,
    ProgressionPolicy,
};
pub use step::{OutcomeCell, SessionStep, StepIdentity};
pub use sequence::{ChildItem, Container, SequenceItem};
pub use machine::{SessionMachine, StepPosition};
pub use builder::{build_session, BuildContext};
pub use superset::assemble_superset_child_states;
pub use calibration::{apply_rir, confirm_calibration_load, insert_auto_regulation_prompt, RirMode};
pub use resume::{find_resumption_index, refresh_after_regeneration};
pub use timer::{TimerCallbacks, TimerService};
pub use history::{last_session_sets, HistoryStore, InMemoryHistory, JsonlHistory};
pub use state::RollingStateBook;
