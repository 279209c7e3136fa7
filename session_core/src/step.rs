//! The session step model.
//!
//! One `SessionStep` is one screen the user will see. Steps are closed sum
//! types: every consumer matches exhaustively. Structural fields are
//! copy-on-write; the one mutable part is the `OutcomeCell`, which is shared
//! between clones of a step so the timer service and the UI-refresh path can
//! update recorded values without a structural sequence edit.

use crate::{
    HrZone, PlateChange, ProgressionVerdict, RestSpec, SetOutcome, SetSpec,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

// ============================================================================
// Outcome Cell
// ============================================================================

/// Single-owner mutable cell holding a step's recorded outcome.
///
/// Cloning the cell shares the underlying value; cloning a step therefore
/// keeps the clone observing the same recording.
#[derive(Clone, Debug, Default)]
pub struct OutcomeCell(Arc<Mutex<SetOutcome>>);

impl OutcomeCell {
    pub fn new(outcome: SetOutcome) -> Self {
        Self(Arc::new(Mutex::new(outcome)))
    }

    /// Snapshot of the current outcome
    pub fn get(&self) -> SetOutcome {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Update the outcome in place
    pub fn update<F: FnOnce(&mut SetOutcome)>(&self, f: F) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Whether two cells observe the same underlying value
    pub fn shares_with(&self, other: &OutcomeCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for OutcomeCell {
    fn eq(&self, other: &Self) -> bool {
        self.shares_with(other) || self.get() == other.get()
    }
}

// ============================================================================
// Step Identity
// ============================================================================

/// Stable identity of a step, used for weak references across the mutable
/// sequence (rest previews, timer registry, resumption matching).
///
/// Never a live pointer: identities are re-resolved against the current
/// flattened sequence whenever they are needed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StepIdentity {
    pub set_id: Uuid,
    pub order: u32,
    pub exercise_id: String,
}

// ============================================================================
// Step Payloads
// ============================================================================

/// Payload of a work, warm-up or calibration-execution set
#[derive(Clone, Debug, PartialEq)]
pub struct SetStep {
    pub exercise_id: String,
    pub spec: SetSpec,
    /// 0-based order within the owning container
    pub order: u32,
    /// The previous session's recorded outcome for the same slot
    pub previous_outcome: Option<SetOutcome>,
    pub outcome: OutcomeCell,
    pub no_prior_history: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub skipped: bool,
    pub hr_bounds: Option<HrZone>,
    pub body_weight: Option<f64>,
    pub plate_change: Option<PlateChange>,
    pub streak: u32,
    pub verdict: Option<ProgressionVerdict>,
    pub is_warmup: bool,
    pub is_calibration: bool,
    pub unilateral: bool,
    /// Intra-set rest sub-counter for unilateral pairs (0 = first side)
    pub side_rest_counter: u32,
}

impl SetStep {
    /// A bare work set over a spec; flags and context default off
    pub fn from_spec(exercise_id: impl Into<String>, spec: SetSpec) -> Self {
        Self {
            exercise_id: exercise_id.into(),
            spec,
            order: 0,
            previous_outcome: None,
            outcome: OutcomeCell::default(),
            no_prior_history: false,
            started_at: None,
            skipped: false,
            hr_bounds: None,
            body_weight: None,
            plate_change: None,
            streak: 0,
            verdict: None,
            is_warmup: false,
            is_calibration: false,
            unilateral: false,
            side_rest_counter: 0,
        }
    }

    pub fn identity(&self) -> StepIdentity {
        StepIdentity {
            set_id: self.spec.set_id,
            order: self.order,
            exercise_id: self.exercise_id.clone(),
        }
    }

    /// True for a work set (neither warm-up nor calibration execution)
    pub fn is_work(&self) -> bool {
        !self.is_warmup && !self.is_calibration
    }
}

/// Payload of a rest step
#[derive(Clone, Debug, PartialEq)]
pub struct RestStep {
    pub spec: RestSpec,
    pub order: u32,
    pub outcome: OutcomeCell,
    /// Identity of the step that follows the rest, for previewing the next
    /// exercise. Recomputed after every structural edit.
    pub next: Option<StepIdentity>,
    pub exercise_id: String,
    /// Intra-set (unilateral side change) rather than inter-set rest
    pub intra_set: bool,
}

impl RestStep {
    pub fn new(duration_ms: i64, exercise_id: impl Into<String>) -> Self {
        Self {
            spec: RestSpec::new(duration_ms),
            order: 0,
            outcome: OutcomeCell::default(),
            next: None,
            exercise_id: exercise_id.into(),
            intra_set: false,
        }
    }

    pub fn identity(&self) -> StepIdentity {
        StepIdentity {
            set_id: self.spec.rest_id,
            order: self.order,
            exercise_id: self.exercise_id.clone(),
        }
    }
}

/// Payload of the calibration load-selection prompt
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationLoadStep {
    pub exercise_id: String,
    pub spec: SetSpec,
    pub order: u32,
    pub previous_outcome: Option<SetOutcome>,
    pub outcome: OutcomeCell,
    pub equipment_id: Option<String>,
    pub hr_bounds: Option<HrZone>,
    pub body_weight: Option<f64>,
    pub unilateral: bool,
}

impl CalibrationLoadStep {
    pub fn identity(&self) -> StepIdentity {
        StepIdentity {
            set_id: self.spec.set_id,
            order: self.order,
            exercise_id: self.exercise_id.clone(),
        }
    }
}

/// Payload of the RIR prompts (calibration and auto-regulation)
#[derive(Clone, Debug, PartialEq)]
pub struct RirSelectionStep {
    /// Identity of the originating set the rating applies to. The live step
    /// is resolved against the current flattened sequence at apply time, so
    /// later edits to that set are never read through a stale snapshot.
    pub origin: StepIdentity,
    pub exercise_id: String,
    pub equipment_id: Option<String>,
    /// Shares the origin's cell; the reported RIR is annotated here
    pub outcome: OutcomeCell,
}

impl RirSelectionStep {
    pub fn for_set(origin: &SetStep, equipment_id: Option<String>) -> Self {
        Self {
            origin: origin.identity(),
            exercise_id: origin.exercise_id.clone(),
            equipment_id,
            outcome: origin.outcome.clone(),
        }
    }
}

// ============================================================================
// Session Step
// ============================================================================

/// One unit of the session sequence: one screen the user will see
#[derive(Clone, Debug, PartialEq)]
pub enum SessionStep {
    /// Session bootstrap: gather equipment, settle in
    Preparing,
    /// Session bootstrap: general warm-up
    Warmup,
    Set(Box<SetStep>),
    Rest(Box<RestStep>),
    Finished { started_at: DateTime<Utc> },
    CalibrationLoadSelection(Box<CalibrationLoadStep>),
    CalibrationRirSelection(Box<RirSelectionStep>),
    AutoRegulationRirSelection(Box<RirSelectionStep>),
}

impl SessionStep {
    /// Stable identity, when the step has one
    pub fn identity(&self) -> Option<StepIdentity> {
        match self {
            SessionStep::Set(s) => Some(s.identity()),
            SessionStep::Rest(r) => Some(r.identity()),
            SessionStep::CalibrationLoadSelection(c) => Some(c.identity()),
            SessionStep::CalibrationRirSelection(r)
            | SessionStep::AutoRegulationRirSelection(r) => Some(r.origin.clone()),
            SessionStep::Preparing | SessionStep::Warmup | SessionStep::Finished { .. } => None,
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, SessionStep::Rest(_))
    }

    /// Steps that carry an executable set specification
    pub fn is_set_like(&self) -> bool {
        matches!(
            self,
            SessionStep::Set(_) | SessionStep::CalibrationLoadSelection(_)
        )
    }

    pub fn as_set(&self) -> Option<&SetStep> {
        match self {
            SessionStep::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rest(&self) -> Option<&RestStep> {
        match self {
            SessionStep::Rest(r) => Some(r),
            _ => None,
        }
    }

    pub fn exercise_id(&self) -> Option<&str> {
        match self {
            SessionStep::Set(s) => Some(&s.exercise_id),
            SessionStep::Rest(r) => Some(&r.exercise_id),
            SessionStep::CalibrationLoadSelection(c) => Some(&c.exercise_id),
            SessionStep::CalibrationRirSelection(r)
            | SessionStep::AutoRegulationRirSelection(r) => Some(&r.exercise_id),
            SessionStep::Preparing | SessionStep::Warmup | SessionStep::Finished { .. } => None,
        }
    }

    /// The outcome cell, when the step records one
    pub fn outcome(&self) -> Option<&OutcomeCell> {
        match self {
            SessionStep::Set(s) => Some(&s.outcome),
            SessionStep::Rest(r) => Some(&r.outcome),
            SessionStep::CalibrationLoadSelection(c) => Some(&c.outcome),
            SessionStep::CalibrationRirSelection(r)
            | SessionStep::AutoRegulationRirSelection(r) => Some(&r.outcome),
            SessionStep::Preparing | SessionStep::Warmup | SessionStep::Finished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_set;

    #[test]
    fn test_cloned_step_shares_outcome_cell() {
        let set = make_set("bench_press", 0, 60.0, 8);
        let step = SessionStep::Set(Box::new(set));
        let clone = step.clone();

        step.outcome().unwrap().update(|o| o.reps = Some(8));

        assert_eq!(clone.outcome().unwrap().get().reps, Some(8));
        assert!(step.outcome().unwrap().shares_with(clone.outcome().unwrap()));
    }

    #[test]
    fn test_rir_selection_shares_origin_cell() {
        let origin = make_set("bench_press", 1, 80.0, 8);
        let prompt = RirSelectionStep::for_set(&origin, None);

        prompt.outcome.update(|o| {
            o.rir = Some(crate::RirRating {
                rir: 2,
                form_broke: false,
            })
        });

        assert_eq!(origin.outcome.get().rir.map(|r| r.rir), Some(2));
    }

    #[test]
    fn test_identity_is_stable_across_clones() {
        let set = make_set("squat", 2, 100.0, 5);
        let a = SessionStep::Set(Box::new(set.clone()));
        let b = SessionStep::Set(Box::new(set));
        assert_eq!(a.identity(), b.identity());
    }
}
