//! Calibration and auto-regulation subflows.
//!
//! Both follow the same shape: ask the user something, then edit the steps
//! that have not happened yet. Edits are insertions plus the removal of the
//! transient prompt itself; executed steps are never rewritten.

use crate::equipment::{CalibrationHelper, PlateCalculator, WarmupPlanner};
use crate::machine::{SessionMachine, StepPosition};
use crate::sequence::{ChildItem, Container, SequenceItem};
use crate::step::{RestStep, RirSelectionStep, SessionStep, SetStep, StepIdentity};
use crate::types::{Equipment, ExerciseDefinition, SetSpec};
use crate::{config::SessionConfig, Error, Result};
use tracing::{debug, info};

/// Which retarget rule an RIR report uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RirMode {
    /// Retarget every work set of the exercise
    Calibration,
    /// Retarget only work sets after the reporting set
    AutoRegulation,
}

/// Consume a pending load-selection block with the load the user picked.
///
/// The block is replaced by the warm-up ladder (when the exercise generates
/// warm-ups) and a calibration-execution block holding the execution set,
/// its RIR prompt and the post-calibration rest. Downstream work sets are
/// retargeted to the snapped load and plate changes are recomputed.
pub fn confirm_calibration_load(
    machine: &SessionMachine,
    def: &ExerciseDefinition,
    equipment: Option<&Equipment>,
    chosen_load: f64,
    warmup_planner: &dyn WarmupPlanner,
    plate_calculator: &dyn PlateCalculator,
    session: &SessionConfig,
) -> Result<SessionMachine> {
    let load = match equipment {
        Some(eq) => eq.nearest_load(chosen_load).unwrap_or(chosen_load),
        None => chosen_load,
    };

    let position = pending_load_selection(machine, &def.id).ok_or_else(|| {
        Error::Session(format!("no pending load selection for {}", def.id))
    })?;

    info!(exercise = %def.id, load, "calibration load confirmed");

    let warmups = match equipment {
        Some(eq) if def.generate_warmups => {
            warmup_planner.warmup_ladder(load, def.reps_range.max, eq)
        }
        _ => Vec::new(),
    };

    let updated = machine.update_exercise_child_item(&position, |item| {
        let selection = item
            .steps()
            .iter()
            .find_map(|step| match step {
                SessionStep::CalibrationLoadSelection(s) => Some((**s).clone()),
                _ => None,
            });

        let mut items = Vec::new();
        for planned in &warmups {
            let mut warmup = SetStep::from_spec(&def.id, SetSpec::new(planned.load, planned.reps));
            warmup.is_warmup = true;
            warmup.body_weight = selection.as_ref().and_then(|s| s.body_weight);
            items.push(ChildItem::Normal(SessionStep::Set(Box::new(warmup))));
            items.push(ChildItem::Normal(SessionStep::Rest(Box::new(
                RestStep::new(session.warmup_rest_ms, &def.id),
            ))));
        }

        // the execution set keeps the selection step's identity and cell
        let mut exec = match selection {
            Some(sel) => {
                let mut spec = sel.spec.clone();
                spec.load = load;
                SetStep {
                    exercise_id: sel.exercise_id,
                    spec,
                    order: sel.order,
                    previous_outcome: sel.previous_outcome,
                    outcome: sel.outcome,
                    no_prior_history: true,
                    started_at: None,
                    skipped: false,
                    hr_bounds: sel.hr_bounds,
                    body_weight: sel.body_weight,
                    plate_change: None,
                    streak: 0,
                    verdict: None,
                    is_warmup: false,
                    is_calibration: true,
                    unilateral: sel.unilateral,
                    side_rest_counter: 0,
                }
            }
            None => {
                let mut set =
                    SetStep::from_spec(&def.id, SetSpec::new(load, def.reps_range.max));
                set.no_prior_history = true;
                set
            }
        };
        exec.is_calibration = true;

        let prompt = RirSelectionStep::for_set(&exec, def.equipment_id.clone());
        items.push(ChildItem::CalibrationExecution(vec![
            SessionStep::Set(Box::new(exec)),
            SessionStep::CalibrationRirSelection(Box::new(prompt)),
            SessionStep::Rest(Box::new(RestStep::new(
                session.post_calibration_rest_ms,
                &def.id,
            ))),
        ]));
        items
    })?;

    Ok(retarget_work_sets(
        &updated,
        &def.id,
        load,
        None,
        equipment,
        plate_calculator,
    ))
}

/// Apply a reported RIR rating.
///
/// The rating lands on the reporting set's shared outcome cell, the adjusted
/// load retargets work sets per the mode, and the transient prompt is
/// removed. In calibration mode the execution step is guaranteed a rest
/// right after it.
pub fn apply_rir(
    machine: &SessionMachine,
    rating: crate::types::RirRating,
    mode: RirMode,
    def: &ExerciseDefinition,
    equipment: Option<&Equipment>,
    helper: &dyn CalibrationHelper,
    plate_calculator: &dyn PlateCalculator,
    session: &SessionConfig,
) -> Result<SessionMachine> {
    let prompt = find_prompt(machine, mode, &def.id).ok_or_else(|| {
        Error::Session(format!("no pending rir selection for {}", def.id))
    })?;

    prompt.outcome.update(|o| o.rir = Some(rating.clone()));

    let origin_identity = prompt.origin.clone();
    let origin_set_id = origin_identity.set_id;

    // the reported load comes from the live reporting set in the current
    // sequence, never from a snapshot taken when the prompt was created
    let reported = machine
        .all_states()
        .iter()
        .find_map(|step| match step {
            SessionStep::Set(s) if s.spec.set_id == origin_set_id => Some(s.spec.load),
            _ => None,
        })
        .ok_or_else(|| {
            Error::Session(format!("reporting set for {} is not in the sequence", def.id))
        })?;
    let adjusted = helper.adjusted_load(reported, &rating);
    let load = match equipment {
        Some(eq) => eq.nearest_load(adjusted).unwrap_or(adjusted),
        None => adjusted,
    };
    debug!(exercise = %def.id, reported, adjusted, load, "rir applied");

    let cleaned = machine.edit_sequence(|mut sequence| {
        for item in &mut sequence {
            let SequenceItem::Container(container) = item else {
                continue;
            };
            match container {
                Container::Exercise { items, .. } => {
                    for child in items.iter_mut() {
                        match child {
                            ChildItem::Normal(_) => {}
                            ChildItem::LoadSelection(steps)
                            | ChildItem::CalibrationExecution(steps)
                            | ChildItem::UnilateralSet(steps) => {
                                steps.retain(|s| !is_prompt_for(s, mode, origin_set_id));
                            }
                        }
                    }
                    items.retain(|child| match child {
                        ChildItem::Normal(step) => !is_prompt_for(step, mode, origin_set_id),
                        other => !other.is_empty(),
                    });
                    if mode == RirMode::Calibration {
                        ensure_post_calibration_rest(items, &def.id, session);
                    }
                }
                Container::Superset { steps } => {
                    steps.retain(|s| !is_prompt_for(s, mode, origin_set_id));
                }
            }
        }
        sequence
    });

    let after = match mode {
        RirMode::Calibration => None,
        RirMode::AutoRegulation => Some(origin_identity),
    };
    Ok(retarget_work_sets(
        &cleaned,
        &def.id,
        load,
        after,
        equipment,
        plate_calculator,
    ))
}

/// Insert an auto-regulation RIR prompt right after the current step.
///
/// The origin is the nearest work set at or before the current position; the
/// prompt shares its outcome cell. The current index is unchanged, so the
/// prompt is the next step the user reaches.
pub fn insert_auto_regulation_prompt(
    machine: &SessionMachine,
    equipment_id: Option<String>,
) -> Result<SessionMachine> {
    let flat = machine.all_states();
    let index = machine.current_index();

    let origin = flat[..=index.min(flat.len().saturating_sub(1))]
        .iter()
        .rev()
        .find_map(|step| match step {
            SessionStep::Set(s) if s.is_work() => Some(&**s),
            _ => None,
        })
        .ok_or_else(|| Error::Session("no work set before the current step".into()))?;

    let prompt = SessionStep::AutoRegulationRirSelection(Box::new(RirSelectionStep::for_set(
        origin,
        equipment_id,
    )));

    let position = machine
        .container_and_child_index(index)
        .ok_or_else(|| Error::Session("current step has no insertable position".into()))?;

    match machine.sequence().get(position.container) {
        Some(SequenceItem::Container(Container::Exercise { .. })) => machine
            .update_exercise_child_item(&position, move |item| {
                vec![item, ChildItem::Normal(prompt)]
            }),
        Some(SequenceItem::Container(Container::Superset { .. })) => machine
            .update_superset_child_states(position.container, move |mut steps| {
                let at = (position.child_item + 1).min(steps.len());
                steps.insert(at, prompt);
                steps
            }),
        _ => Err(Error::Session(
            "current step is not inside a container".into(),
        )),
    }
}

/// Retarget work sets of one exercise to `load`, either all of them or only
/// those after `after`, then recompute plate changes over the new loads.
fn retarget_work_sets(
    machine: &SessionMachine,
    exercise_id: &str,
    load: f64,
    after: Option<StepIdentity>,
    equipment: Option<&Equipment>,
    plate_calculator: &dyn PlateCalculator,
) -> SessionMachine {
    machine.edit_sequence(|mut sequence| {
        let mut passed = after.is_none();
        for item in &mut sequence {
            let SequenceItem::Container(container) = item else {
                continue;
            };
            let steps: Vec<&mut SessionStep> = match container {
                Container::Exercise { items, .. } => items
                    .iter_mut()
                    .flat_map(|c| c.steps_mut().iter_mut())
                    .collect(),
                Container::Superset { steps } => steps.iter_mut().collect(),
            };
            for step in steps {
                if passed {
                    if let SessionStep::Set(set) = step {
                        if set.exercise_id == exercise_id && set.is_work() {
                            set.spec.load = load;
                        }
                    }
                } else if step.identity().as_ref() == after.as_ref() {
                    passed = true;
                }
            }
        }
        recompute_plate_changes(&mut sequence, exercise_id, equipment, plate_calculator);
        sequence
    })
}

/// Walk the exercise's sets in order and recompute each plate change from
/// the load of the set before it, starting from the bare bar.
fn recompute_plate_changes(
    sequence: &mut [SequenceItem],
    exercise_id: &str,
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
    for item in sequence {
        let SequenceItem::Container(container) = item else {
            continue;
        };
        let steps: Vec<&mut SessionStep> = match container {
            Container::Exercise { items, .. } => items
                .iter_mut()
                .flat_map(|c| c.steps_mut().iter_mut())
                .collect(),
            Container::Superset { steps } => steps.iter_mut().collect(),
        };
        for step in steps {
            if let SessionStep::Set(set) = step {
                if set.exercise_id == exercise_id {
                    set.plate_change = plate_calculator.plate_change(prev, set.spec.load, eq);
                    prev = set.spec.load;
                }
            }
        }
    }
}

fn pending_load_selection(machine: &SessionMachine, exercise_id: &str) -> Option<StepPosition> {
    machine
        .sequence()
        .iter()
        .enumerate()
        .find_map(|(container, item)| match item {
            SequenceItem::Container(Container::Exercise {
                exercise_id: ex,
                items,
            }) if ex == exercise_id => items
                .iter()
                .position(|c| matches!(c, ChildItem::LoadSelection(_)))
                .map(|child_item| StepPosition {
                    container,
                    child_item,
                    within_item: 0,
                }),
            _ => None,
        })
}

fn find_prompt(
    machine: &SessionMachine,
    mode: RirMode,
    exercise_id: &str,
) -> Option<RirSelectionStep> {
    machine.all_states().into_iter().find_map(|step| match step {
        SessionStep::CalibrationRirSelection(p)
            if mode == RirMode::Calibration && p.exercise_id == exercise_id =>
        {
            Some(*p)
        }
        SessionStep::AutoRegulationRirSelection(p)
            if mode == RirMode::AutoRegulation && p.exercise_id == exercise_id =>
        {
            Some(*p)
        }
        _ => None,
    })
}

fn is_prompt_for(step: &SessionStep, mode: RirMode, origin_set_id: uuid::Uuid) -> bool {
    match (mode, step) {
        (RirMode::Calibration, SessionStep::CalibrationRirSelection(p))
        | (RirMode::AutoRegulation, SessionStep::AutoRegulationRirSelection(p)) => {
            p.origin.set_id == origin_set_id
        }
        _ => false,
    }
}

/// Insert the post-calibration rest when the execution step is not already
/// followed by one. Operates inside the calibration-execution block.
fn ensure_post_calibration_rest(
    items: &mut [ChildItem],
    exercise_id: &str,
    session: &SessionConfig,
) {
    for child in items {
        let ChildItem::CalibrationExecution(steps) = child else {
            continue;
        };
        let Some(exec_at) = steps
            .iter()
            .position(|s| s.as_set().is_some_and(|set| set.is_calibration))
        else {
            continue;
        };
        let followed_by_rest = steps.get(exec_at + 1).is_some_and(SessionStep::is_rest);
        if !followed_by_rest {
            steps.insert(
                exec_at + 1,
                SessionStep::Rest(Box::new(RestStep::new(
                    session.post_calibration_rest_ms,
                    exercise_id,
                ))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::equipment::{BarPlateCalculator, PercentWarmupPlanner, RirLoadAdjuster};
    use crate::step::{CalibrationLoadStep, OutcomeCell};
    use crate::testutil::{make_set, rest_step, set_step};
    use crate::types::{RepsRange, RirRating, SetKind};
    use chrono::Utc;

    fn cable_row_def() -> ExerciseDefinition {
        ExerciseDefinition {
            id: "cable_row".into(),
            name: "Seated Cable Row".into(),
            equipment_id: Some("cable_stack".into()),
            nominal_load: 40.0,
            set_count: 3,
            reps_range: RepsRange::new(8, 12),
            rest_ms: 90_000,
            kind: SetKind::Reps,
            unilateral: false,
            generate_warmups: false,
            needs_calibration: true,
            hr_bounds: None,
            stores_history: true,
        }
    }

    fn sparse_stack() -> Equipment {
        Equipment {
            id: "cable_stack".into(),
            name: "Cable Stack".into(),
            available_loads: vec![75.0, 82.5, 90.0],
            plate_based: false,
            bar_weight: 0.0,
            plate_pairs: vec![],
        }
    }

    fn machine_with_load_selection(def: &ExerciseDefinition) -> SessionMachine {
        let selection = CalibrationLoadStep {
            exercise_id: def.id.clone(),
            spec: SetSpec::new(def.nominal_load, def.reps_range.max),
            order: 0,
            previous_outcome: None,
            outcome: OutcomeCell::default(),
            equipment_id: def.equipment_id.clone(),
            hr_bounds: None,
            body_weight: None,
            unilateral: false,
        };
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![
                ChildItem::LoadSelection(vec![SessionStep::CalibrationLoadSelection(
                    Box::new(selection),
                )]),
                ChildItem::Normal(set_step(&def.id, 1, def.nominal_load, 8)),
                ChildItem::Normal(rest_step(&def.id, def.rest_ms)),
                ChildItem::Normal(set_step(&def.id, 2, def.nominal_load, 8)),
            ],
        })];
        SessionMachine::new(seq, Utc::now())
    }

    #[test]
    fn test_confirm_builds_execution_block_and_retargets() {
        let def = cable_row_def();
        let eq = sparse_stack();
        let machine = machine_with_load_selection(&def);
        let session = Config::default().session;

        let confirmed = confirm_calibration_load(
            &machine,
            &def,
            Some(&eq),
            80.0,
            &PercentWarmupPlanner,
            &BarPlateCalculator,
            &session,
        )
        .unwrap();

        let flat = confirmed.all_states();
        assert!(!flat
            .iter()
            .any(|s| matches!(s, SessionStep::CalibrationLoadSelection(_))));

        let exec = flat
            .iter()
            .find_map(|s| s.as_set().filter(|set| set.is_calibration))
            .unwrap();
        // 80 snapped onto {75, 82.5, 90}
        assert_eq!(exec.spec.load, 82.5);

        // prompt follows the execution set and shares its cell
        let prompt_idx = flat
            .iter()
            .position(|s| matches!(s, SessionStep::CalibrationRirSelection(_)))
            .unwrap();
        if let SessionStep::CalibrationRirSelection(p) = &flat[prompt_idx] {
            assert!(p.outcome.shares_with(&exec.outcome));
        }

        // downstream work sets now read the confirmed load
        for set in flat.iter().filter_map(|s| s.as_set()) {
            if set.is_work() {
                assert_eq!(set.spec.load, 82.5);
            }
        }
    }

    #[test]
    fn test_confirm_without_pending_selection_is_an_error() {
        let def = cable_row_def();
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![ChildItem::Normal(set_step(&def.id, 0, 40.0, 8))],
        })];
        let machine = SessionMachine::new(seq, Utc::now());
        let session = Config::default().session;

        let result = confirm_calibration_load(
            &machine,
            &def,
            None,
            80.0,
            &PercentWarmupPlanner,
            &BarPlateCalculator,
            &session,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_calibration_rir_retargets_all_work_sets() {
        let def = cable_row_def();
        let eq = sparse_stack();
        let session = Config::default().session;
        let machine = machine_with_load_selection(&def);

        let confirmed = confirm_calibration_load(
            &machine,
            &def,
            Some(&eq),
            80.0,
            &PercentWarmupPlanner,
            &BarPlateCalculator,
            &session,
        )
        .unwrap();

        // previous load 80 reported as rir 2, no form break: +5%, snapped up
        let mut confirmed = confirmed;
        // set the execution load back to the reported 80 for the scenario
        confirmed = confirmed.edit_sequence(|mut seq| {
            for item in &mut seq {
                if let SequenceItem::Container(Container::Exercise { items, .. }) = item {
                    for child in items {
                        for step in child.steps_mut() {
                            if let SessionStep::Set(set) = step {
                                if set.is_calibration {
                                    set.spec.load = 80.0;
                                }
                            }
                        }
                    }
                }
            }
            seq
        });

        let applied = apply_rir(
            &confirmed,
            RirRating {
                rir: 2,
                form_broke: false,
            },
            RirMode::Calibration,
            &def,
            Some(&eq),
            &RirLoadAdjuster,
            &BarPlateCalculator,
            &session,
        )
        .unwrap();

        let flat = applied.all_states();
        assert!(!flat
            .iter()
            .any(|s| matches!(s, SessionStep::CalibrationRirSelection(_))));
        for set in flat.iter().filter_map(|s| s.as_set()) {
            if set.is_work() {
                // 80 * 1.05 = 84, nearest of {75, 82.5, 90} is 82.5
                assert_eq!(set.spec.load, 82.5);
            }
        }
        // rating stored on the execution set's cell
        let exec = flat
            .iter()
            .find_map(|s| s.as_set().filter(|set| set.is_calibration))
            .unwrap();
        assert_eq!(exec.outcome.get().rir.map(|r| r.rir), Some(2));
    }

    #[test]
    fn test_calibration_rir_guarantees_rest_after_execution() {
        let def = cable_row_def();
        let session = Config::default().session;

        // execution block missing its rest
        let exec = {
            let mut set = make_set(&def.id, 0, 80.0, 10);
            set.is_calibration = true;
            set
        };
        let prompt = RirSelectionStep::for_set(&exec, def.equipment_id.clone());
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![
                ChildItem::CalibrationExecution(vec![
                    SessionStep::Set(Box::new(exec)),
                    SessionStep::CalibrationRirSelection(Box::new(prompt)),
                ]),
                ChildItem::Normal(set_step(&def.id, 1, 80.0, 10)),
            ],
        })];
        let machine = SessionMachine::new(seq, Utc::now());

        let applied = apply_rir(
            &machine,
            RirRating {
                rir: 0,
                form_broke: false,
            },
            RirMode::Calibration,
            &def,
            None,
            &RirLoadAdjuster,
            &BarPlateCalculator,
            &session,
        )
        .unwrap();

        let flat = applied.all_states();
        let exec_at = flat
            .iter()
            .position(|s| s.as_set().is_some_and(|set| set.is_calibration))
            .unwrap();
        assert!(flat[exec_at + 1].is_rest());
    }

    #[test]
    fn test_auto_regulation_retargets_only_later_sets() {
        let def = cable_row_def();
        let eq = sparse_stack();
        let session = Config::default().session;

        let first = make_set(&def.id, 0, 82.5, 10);
        let second = make_set(&def.id, 1, 82.5, 10);
        let third = make_set(&def.id, 2, 82.5, 10);
        let prompt = RirSelectionStep::for_set(&first, def.equipment_id.clone());
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![
                ChildItem::Normal(SessionStep::Set(Box::new(first.clone()))),
                ChildItem::Normal(SessionStep::AutoRegulationRirSelection(Box::new(prompt))),
                ChildItem::Normal(SessionStep::Set(Box::new(second))),
                ChildItem::Normal(SessionStep::Set(Box::new(third))),
            ],
        })];
        let machine = SessionMachine::new(seq, Utc::now());

        let applied = apply_rir(
            &machine,
            RirRating {
                rir: 4,
                form_broke: false,
            },
            RirMode::AutoRegulation,
            &def,
            Some(&eq),
            &RirLoadAdjuster,
            &BarPlateCalculator,
            &session,
        )
        .unwrap();

        let flat = applied.all_states();
        assert!(!flat
            .iter()
            .any(|s| matches!(s, SessionStep::AutoRegulationRirSelection(_))));
        let loads: Vec<f64> = flat
            .iter()
            .filter_map(|s| s.as_set())
            .map(|set| set.spec.load)
            .collect();
        // reporter keeps its recorded load; 82.5 * 1.10 = 90.75 snaps to 90
        assert_eq!(loads, vec![82.5, 90.0, 90.0]);
    }

    #[test]
    fn test_insert_auto_regulation_prompt_lands_after_current() {
        let def = cable_row_def();
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![
                ChildItem::Normal(set_step(&def.id, 0, 80.0, 10)),
                ChildItem::Normal(rest_step(&def.id, 90_000)),
                ChildItem::Normal(set_step(&def.id, 1, 80.0, 10)),
            ],
        })];
        // position on the first set (flat index 2 after the bootstrap steps)
        let machine = SessionMachine::new(seq, Utc::now()).with_current_index(2);

        let inserted =
            insert_auto_regulation_prompt(&machine, def.equipment_id.clone()).unwrap();

        let flat = inserted.all_states();
        assert!(matches!(
            flat[3],
            SessionStep::AutoRegulationRirSelection(_)
        ));
        assert_eq!(inserted.current_index(), 2);
        // the prompt shares the reporting set's cell
        if let (SessionStep::Set(set), SessionStep::AutoRegulationRirSelection(p)) =
            (&flat[2], &flat[3])
        {
            assert!(p.outcome.shares_with(&set.outcome));
        }
    }

    #[test]
    fn test_insert_prompt_without_prior_work_set_is_an_error() {
        let def = cable_row_def();
        let seq = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: def.id.clone(),
            items: vec![ChildItem::Normal(set_step(&def.id, 0, 80.0, 10))],
        })];
        let machine = SessionMachine::new(seq, Utc::now()); // still on Preparing

        assert!(insert_auto_regulation_prompt(&machine, None).is_err());
    }
}
