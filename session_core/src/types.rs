//! Core domain types for the guided strength-session engine.
//!
//! This module defines the fundamental value types used throughout the system:
//! - Planned sets, rests and session plans
//! - Progression verdicts and per-exercise rolling state
//! - Recorded outcomes and committed history rows
//! - Exercise, equipment and workout definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Planning Value Types
// ============================================================================

/// One planned set: a target load and rep count
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlannedSet {
    pub load: f64,
    pub reps: u32,
}

impl PlannedSet {
    pub fn new(load: f64, reps: u32) -> Self {
        Self { load, reps }
    }

    /// Volume contribution of this set (load x reps)
    pub fn volume(&self) -> f64 {
        self.load * f64::from(self.reps)
    }
}

/// A complete set-by-set plan for one exercise in one session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionPlan {
    pub sets: Vec<PlannedSet>,
    /// Total volume of the session the plan was derived from
    pub previous_volume: f64,
    /// Total volume of the planned session
    pub new_volume: f64,
}

impl SessionPlan {
    /// True when the plan found no viable progression (volumes equal after
    /// rounding to 2 decimals). The caller reclassifies the verdict to
    /// `Failed` in that case.
    pub fn is_stalled(&self) -> bool {
        round2(self.previous_volume) == round2(self.new_volume)
    }
}

/// Inclusive rep range for double progression
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepsRange {
    pub min: u32,
    pub max: u32,
}

impl RepsRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, reps: u32) -> u32 {
        reps.clamp(self.min, self.max)
    }
}

/// Load-jump policy for double progression
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct JumpPolicy {
    /// Preferred relative load increase when reps top out (e.g. 0.025)
    pub default_pct: f64,
    /// Largest permitted relative increase when breaking a plateau
    pub max_pct: f64,
    /// Number of consecutive sessions without a load increase before the
    /// plateau jump is permitted
    pub overcap_until: u32,
}

/// Per-exercise verdict for one session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionVerdict {
    Progress,
    Retry,
    Deload,
    Failed,
}

/// Output of the session decision rule
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDecision {
    pub verdict: ProgressionVerdict,
    /// When true, the plan is rebuilt from the last successful session
    /// instead of progressing from the most recent one
    pub load_last_successful: bool,
    pub last_successful: Option<Vec<PlannedSet>>,
}

/// Verdict plus the concrete plan derived from it
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedSession {
    pub verdict: ProgressionVerdict,
    pub plan: SessionPlan,
}

// ============================================================================
// Outcome Types
// ============================================================================

/// A user-reported reps-in-reserve rating
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RirRating {
    pub rir: u8,
    pub form_broke: bool,
}

/// The mutable recording cell of a step: what actually happened.
///
/// Structural step fields are copy-on-write; this is the one part that is
/// updated in place (by user input and by the timer service).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SetOutcome {
    pub load: Option<f64>,
    pub reps: Option<u32>,
    pub rir: Option<RirRating>,
    /// Configured timer duration/target in milliseconds
    pub start_timer_ms: Option<i64>,
    /// Remaining (count-down) or elapsed (count-up) milliseconds
    pub end_timer_ms: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SetOutcome {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// A committed history row for one executed set.
///
/// This is what history stores persist and what resumption matches step
/// identities against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetRecord {
    pub id: Uuid,
    pub workout_history_id: Uuid,
    pub set_id: Uuid,
    pub exercise_id: String,
    pub order: u32,
    pub load: f64,
    pub reps: u32,
    pub rir: Option<RirRating>,
    pub performed_at: DateTime<Utc>,
}

// ============================================================================
// Rolling State
// ============================================================================

/// Per-exercise rolling counters driving the progression decision
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExerciseRollingState {
    pub last_successful_session: Option<Vec<PlannedSet>>,
    pub best_session: Option<Vec<PlannedSet>>,
    pub successful_session_counter: u32,
    pub session_failed_counter: u32,
    /// Completions counted within the ISO week of `weekly_completion_update_date`
    pub times_completed_in_a_week: u32,
    pub weekly_completion_update_date: Option<DateTime<Utc>>,
    pub last_session_was_deload: bool,
    /// Consecutive sessions without a top-load increase (plateau detection)
    #[serde(default)]
    pub sessions_without_load_increase: u32,
}

// ============================================================================
// Set / Rest Specifications
// ============================================================================

/// How a set is executed and timed
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetKind {
    /// Plain rep-counted set, no timer
    Reps,
    /// Count-down set of a fixed duration (e.g. a plank)
    TimedDuration { duration_ms: i64 },
    /// Count-up set toward a target (e.g. a carry), optionally auto-stopping
    Endurance { target_ms: i64, auto_stop: bool },
}

/// The planned specification of one set
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetSpec {
    pub set_id: Uuid,
    pub load: f64,
    pub reps: u32,
    pub kind: SetKind,
}

impl SetSpec {
    pub fn new(load: f64, reps: u32) -> Self {
        Self {
            set_id: Uuid::new_v4(),
            load,
            reps,
            kind: SetKind::Reps,
        }
    }
}

/// The planned specification of one rest
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RestSpec {
    pub rest_id: Uuid,
    pub duration_ms: i64,
}

impl RestSpec {
    pub fn new(duration_ms: i64) -> Self {
        Self {
            rest_id: Uuid::new_v4(),
            duration_ms,
        }
    }
}

/// Heart-rate zone bounds attached to a set
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HrZone {
    pub lower_bpm: u32,
    pub upper_bpm: u32,
}

/// A plate change between two consecutive loads on plate-based equipment
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlateChange {
    /// Per-side plates to add, heaviest first
    pub add_per_side: Vec<f64>,
    /// Per-side plates to remove, heaviest first
    pub remove_per_side: Vec<f64>,
}

impl PlateChange {
    pub fn is_noop(&self) -> bool {
        self.add_per_side.is_empty() && self.remove_per_side.is_empty()
    }
}

// ============================================================================
// Equipment and Exercise Definitions
// ============================================================================

/// A piece of equipment with its finite, realizable load ladder
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    /// Achievable loads, sorted ascending
    pub available_loads: Vec<f64>,
    /// True when loads are realized as plate pairs on a bar
    pub plate_based: bool,
    pub bar_weight: f64,
    /// Per-side plate denominations available, heaviest first
    pub plate_pairs: Vec<f64>,
}

impl Equipment {
    /// Snap a target to the nearest achievable load (absolute difference)
    pub fn nearest_load(&self, target: f64) -> Option<f64> {
        nearest_load(&self.available_loads, target)
    }

    /// Smallest achievable load that is at least `min`
    pub fn next_load_at_least(&self, min: f64) -> Option<f64> {
        self.available_loads.iter().copied().find(|l| *l >= min)
    }
}

/// Snap a target to the nearest member of a load ladder (ties go low)
pub fn nearest_load(available: &[f64], target: f64) -> Option<f64> {
    available.iter().copied().fold(None, |best, l| match best {
        None => Some(l),
        Some(b) if (l - target).abs() < (b - target).abs() => Some(l),
        Some(b) => Some(b),
    })
}

/// Round to 2 decimals, used wherever volumes/loads are compared
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The nominal definition of one exercise inside a workout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExerciseDefinition {
    pub id: String,
    pub name: String,
    pub equipment_id: Option<String>,
    pub nominal_load: f64,
    pub set_count: u32,
    pub reps_range: RepsRange,
    /// Rest between work sets, milliseconds
    pub rest_ms: i64,
    pub kind: SetKind,
    /// Performed one side at a time (each set is a left/right pair)
    pub unilateral: bool,
    pub generate_warmups: bool,
    /// The working load is unknown and must be discovered in-session
    pub needs_calibration: bool,
    pub hr_bounds: Option<HrZone>,
    /// Whether completed sets are written to the history store
    pub stores_history: bool,
}

/// A superset: several exercises performed back-to-back with interleaved rest
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupersetDefinition {
    pub exercises: Vec<ExerciseDefinition>,
    /// Rest after each exercise's set within a round, milliseconds
    pub rest_by_exercise: HashMap<String, i64>,
}

/// One entry of a workout: a single exercise or a superset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WorkoutEntry {
    Exercise(ExerciseDefinition),
    Superset(SupersetDefinition),
}

/// A complete workout definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutDefinition {
    pub id: String,
    pub name: String,
    pub entries: Vec<WorkoutEntry>,
}

impl WorkoutDefinition {
    /// All exercise definitions in configured order
    pub fn exercises(&self) -> Vec<&ExerciseDefinition> {
        self.entries
            .iter()
            .flat_map(|e| match e {
                WorkoutEntry::Exercise(def) => vec![def],
                WorkoutEntry::Superset(ss) => ss.exercises.iter().collect(),
            })
            .collect()
    }
}

// ============================================================================
// Catalog Type
// ============================================================================

/// The complete catalog of exercises and equipment
#[derive(Clone, Debug)]
pub struct Catalog {
    pub exercises: HashMap<String, ExerciseDefinition>,
    pub equipment: HashMap<String, Equipment>,
}
