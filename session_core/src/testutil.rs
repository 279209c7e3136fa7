//! Shared helpers for unit tests.

use crate::step::{RestStep, SetStep};
use crate::{Equipment, OutcomeCell, SessionStep, SetKind, SetSpec};
use uuid::Uuid;

pub(crate) fn make_set(exercise_id: &str, order: u32, load: f64, reps: u32) -> SetStep {
    SetStep {
        exercise_id: exercise_id.into(),
        spec: SetSpec {
            set_id: Uuid::new_v4(),
            load,
            reps,
            kind: SetKind::Reps,
        },
        order,
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

pub(crate) fn set_step(exercise_id: &str, order: u32, load: f64, reps: u32) -> SessionStep {
    SessionStep::Set(Box::new(make_set(exercise_id, order, load, reps)))
}

pub(crate) fn warmup_step(exercise_id: &str, order: u32, load: f64, reps: u32) -> SessionStep {
    let mut set = make_set(exercise_id, order, load, reps);
    set.is_warmup = true;
    SessionStep::Set(Box::new(set))
}

pub(crate) fn rest_step(exercise_id: &str, duration_ms: i64) -> SessionStep {
    SessionStep::Rest(Box::new(RestStep::new(duration_ms, exercise_id)))
}

pub(crate) fn small_gym_equipment() -> Equipment {
    Equipment {
        id: "barbell".into(),
        name: "Barbell".into(),
        available_loads: (0..40).map(|i| 20.0 + 2.5 * f64::from(i)).collect(),
        plate_based: true,
        bar_weight: 20.0,
        plate_pairs: vec![20.0, 15.0, 10.0, 5.0, 2.5, 1.25],
    }
}
