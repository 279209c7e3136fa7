//! Session construction: workout definition + computed plans in, machine out.
//!
//! Missing data never aborts the build. An exercise without a catalog or
//! progression entry falls back to its nominal plan; one whose load is still
//! unknown gets a calibration load-selection block instead of work sets.

use crate::config::SessionConfig;
use crate::equipment::{PlateCalculator, WarmupPlanner};
use crate::history::{last_session_sets, HistoryStore};
use crate::machine::SessionMachine;
use crate::progression::{plan_session, ProgressionPolicy};
use crate::sequence::{ChildItem, Container, SequenceItem};
use crate::state::RollingStateBook;
use crate::step::{CalibrationLoadStep, OutcomeCell, RestStep, SessionStep, SetStep};
use crate::superset::assemble_superset_child_states;
use crate::types::{
    Catalog, Equipment, ExerciseDefinition, PlannedSession, PlannedSet, ProgressionVerdict,
    SetOutcome, SetSpec, WorkoutDefinition, WorkoutEntry,
};
use crate::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Everything session construction reads; owned by the caller
pub struct BuildContext<'a> {
    pub catalog: &'a Catalog,
    pub history: &'a dyn HistoryStore,
    pub rolling: &'a RollingStateBook,
    pub policy: &'a ProgressionPolicy,
    pub session: &'a SessionConfig,
    pub warmup_planner: &'a dyn WarmupPlanner,
    pub plate_calculator: &'a dyn PlateCalculator,
    pub body_weight: Option<f64>,
    pub now: DateTime<Utc>,
}

/// Build the initial session sequence for a workout.
///
/// Entries appear in configured order with a between-exercise rest after
/// each; the machine's normalization strips the trailing one and any other
/// rest-invariant violations.
pub fn build_session(
    workout: &WorkoutDefinition,
    ctx: &BuildContext<'_>,
) -> Result<SessionMachine> {
    let mut sequence = Vec::new();

    for entry in &workout.entries {
        let item = match entry {
            WorkoutEntry::Exercise(def) => build_exercise(def, ctx)?,
            WorkoutEntry::Superset(superset) => {
                let mut queues = Vec::new();
                for def in &superset.exercises {
                    let Some(container) = build_exercise(def, ctx)? else {
                        continue;
                    };
                    let steps = match container {
                        SequenceItem::Container(Container::Exercise { items, .. }) => items
                            .iter()
                            .flat_map(|c| c.steps().iter().cloned())
                            .collect(),
                        _ => Vec::new(),
                    };
                    queues.push((def.id.clone(), steps));
                }
                if queues.is_empty() {
                    None
                } else {
                    Some(SequenceItem::Container(Container::Superset {
                        steps: assemble_superset_child_states(
                            queues,
                            &superset.rest_by_exercise,
                        ),
                    }))
                }
            }
        };
        if let Some(item) = item {
            sequence.push(item);
            sequence.push(SequenceItem::RestBetweenExercises(Box::new(RestStep::new(
                ctx.session.between_exercise_rest_ms,
                entry_exercise_id(entry),
            ))));
        }
    }

    info!(workout = %workout.id, entries = sequence.len() / 2, "session built");
    Ok(SessionMachine::new(sequence, ctx.now))
}

fn entry_exercise_id(entry: &WorkoutEntry) -> String {
    match entry {
        WorkoutEntry::Exercise(def) => def.id.clone(),
        WorkoutEntry::Superset(ss) => ss
            .exercises
            .first()
            .map(|d| d.id.clone())
            .unwrap_or_default(),
    }
}

/// Build one exercise container, or `None` when the exercise produces no
/// steps (zero sets).
fn build_exercise(
    def: &ExerciseDefinition,
    ctx: &BuildContext<'_>,
) -> Result<Option<SequenceItem>> {
    let equipment = def
        .equipment_id
        .as_deref()
        .and_then(|id| ctx.catalog.equipment.get(id));
    if def.equipment_id.is_some() && equipment.is_none() {
        warn!(exercise = %def.id, "equipment missing from catalog, using nominal loads");
    }

    let previous = if def.stores_history {
        last_session_sets(ctx.history, &def.id)?
    } else {
        None
    };

    // No recorded load yet: ask instead of guessing
    if def.needs_calibration && previous.is_none() {
        return Ok(Some(calibration_entry(def, equipment, ctx)));
    }

    let rolling = ctx.rolling.get(&def.id);
    let available: &[f64] = equipment.map(|eq| eq.available_loads.as_slice()).unwrap_or(&[]);
    let previous_sets = previous.as_ref().map(|(sets, _)| sets.as_slice());
    let previous_outcomes = previous.as_ref().map(|(_, outcomes)| outcomes.as_slice());

    let planned = plan_session(def, &rolling, previous_sets, available, ctx.policy, ctx.now)
        .unwrap_or_else(|| nominal_plan(def));

    if planned.plan.sets.is_empty() {
        return Ok(None);
    }

    let mut items = Vec::new();

    if def.generate_warmups {
        if let Some(eq) = equipment {
            let top = planned
                .plan
                .sets
                .iter()
                .map(|s| s.load)
                .fold(f64::MIN, f64::max);
            for rung in ctx.warmup_planner.warmup_ladder(top, def.reps_range.max, eq) {
                let mut warmup = SetStep::from_spec(&def.id, SetSpec::new(rung.load, rung.reps));
                warmup.is_warmup = true;
                warmup.body_weight = ctx.body_weight;
                items.push(ChildItem::Normal(SessionStep::Set(Box::new(warmup))));
                items.push(ChildItem::Normal(SessionStep::Rest(Box::new(
                    RestStep::new(ctx.session.warmup_rest_ms, &def.id),
                ))));
            }
        }
    }

    for (i, planned_set) in planned.plan.sets.iter().enumerate() {
        let set = work_set(
            def,
            planned_set,
            &planned,
            previous_outcomes.and_then(|o| o.get(i)),
            rolling.successful_session_counter,
            previous.is_none(),
            ctx,
        );
        push_work_items(&mut items, def, set);
    }

    attach_plate_changes(&mut items, equipment, ctx.plate_calculator);

    Ok(Some(SequenceItem::Container(Container::Exercise {
        exercise_id: def.id.clone(),
        items,
    })))
}

/// Append one work set and its trailing rest, expanding unilateral sets
/// into their set, side-change rest, second-side triple
fn push_work_items(items: &mut Vec<ChildItem>, def: &ExerciseDefinition, set: SetStep) {
    if def.unilateral {
        // both sides are one unit: set, side-change rest, repeated set
        let mut second = set.clone();
        second.side_rest_counter = 1;
        let mut intra = RestStep::new(def.rest_ms, &def.id);
        intra.intra_set = true;
        items.push(ChildItem::UnilateralSet(vec![
            SessionStep::Set(Box::new(set)),
            SessionStep::Rest(Box::new(intra)),
            SessionStep::Set(Box::new(second)),
        ]));
    } else {
        items.push(ChildItem::Normal(SessionStep::Set(Box::new(set))));
    }
    items.push(ChildItem::Normal(SessionStep::Rest(Box::new(
        RestStep::new(def.rest_ms, &def.id),
    ))));
}

fn work_set(
    def: &ExerciseDefinition,
    planned_set: &PlannedSet,
    planned: &PlannedSession,
    previous_outcome: Option<&SetOutcome>,
    streak: u32,
    no_prior_history: bool,
    ctx: &BuildContext<'_>,
) -> SetStep {
    let mut spec = SetSpec::new(planned_set.load, planned_set.reps);
    spec.kind = def.kind.clone();
    SetStep {
        exercise_id: def.id.clone(),
        spec,
        order: 0,
        previous_outcome: previous_outcome.cloned(),
        outcome: OutcomeCell::default(),
        no_prior_history,
        started_at: None,
        skipped: false,
        hr_bounds: def.hr_bounds,
        body_weight: ctx.body_weight,
        plate_change: None,
        streak,
        verdict: Some(planned.verdict.clone()),
        is_warmup: false,
        is_calibration: false,
        unilateral: def.unilateral,
        side_rest_counter: 0,
    }
}

/// The fallback when planning finds no progression entry at all
fn nominal_plan(def: &ExerciseDefinition) -> PlannedSession {
    let sets: Vec<PlannedSet> = (0..def.set_count)
        .map(|_| PlannedSet {
            load: def.nominal_load,
            reps: def.reps_range.min,
        })
        .collect();
    let volume = sets.iter().map(PlannedSet::volume).sum();
    PlannedSession {
        verdict: ProgressionVerdict::Progress,
        plan: crate::types::SessionPlan {
            sets,
            previous_volume: 0.0,
            new_volume: volume,
        },
    }
}

fn calibration_entry(
    def: &ExerciseDefinition,
    equipment: Option<&Equipment>,
    ctx: &BuildContext<'_>,
) -> SequenceItem {
    info!(exercise = %def.id, "no recorded load, inserting calibration selection");
    let mut spec = SetSpec::new(def.nominal_load, def.reps_range.max);
    spec.kind = def.kind.clone();
    let selection = CalibrationLoadStep {
        exercise_id: def.id.clone(),
        spec,
        order: 0,
        previous_outcome: None,
        outcome: OutcomeCell::default(),
        equipment_id: def.equipment_id.clone(),
        hr_bounds: def.hr_bounds,
        body_weight: ctx.body_weight,
        unilateral: def.unilateral,
    };
    let mut items = vec![ChildItem::LoadSelection(vec![
        SessionStep::CalibrationLoadSelection(Box::new(selection)),
    ])];

    // Work sets go out at the nominal load; confirming the calibration load
    // retargets them in place once it is known
    let planned = nominal_plan(def);
    for planned_set in &planned.plan.sets {
        let set = work_set(def, planned_set, &planned, None, 0, true, ctx);
        push_work_items(&mut items, def, set);
    }

    attach_plate_changes(&mut items, equipment, ctx.plate_calculator);

    SequenceItem::Container(Container::Exercise {
        exercise_id: def.id.clone(),
        items,
    })
}

/// Plate changes walked from the bare bar through the exercise's sets in order
fn attach_plate_changes(
    items: &mut [ChildItem],
    equipment: Option<&Equipment>,
    plate_calculator: &dyn PlateCalculator,
) {
    let Some(eq) = equipment else {
        return;
    };
    if !eq.plate_based {
        return;
    }

    let mut prev = eq.bar_weight;
    for child in items {
        for step in child.steps_mut() {
            if let SessionStep::Set(set) = step {
                set.plate_change = plate_calculator.plate_change(prev, set.spec.load, eq);
                prev = set.spec.load;
            }
        }
    }
}
