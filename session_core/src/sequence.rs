//! The hierarchical session sequence.
//!
//! The full session is an ordered list of `SequenceItem`s: exercise or
//! superset containers, separated by rests-between-exercises. Flattening the
//! hierarchy yields the linear step list that drives navigation. Edits happen
//! on the hierarchical form; every edit is followed by `normalize` (rest
//! invariants), `reindex` (order indices) and `recompute_rest_next` (weak
//! step references).

use crate::step::{RestStep, SessionStep, StepIdentity};

// ============================================================================
// Containers
// ============================================================================

/// One child of an exercise container
#[derive(Clone, Debug, PartialEq)]
pub enum ChildItem {
    /// A plain step (set, rest, prompt)
    Normal(SessionStep),
    /// Calibration load-selection (pre-confirmation)
    LoadSelection(Vec<SessionStep>),
    /// Calibration execution, its RIR prompt and the post-calibration rest
    CalibrationExecution(Vec<SessionStep>),
    /// One unilateral "both sides" unit: set, intra-set rest, repeated set
    UnilateralSet(Vec<SessionStep>),
}

impl ChildItem {
    pub fn steps(&self) -> &[SessionStep] {
        match self {
            ChildItem::Normal(step) => std::slice::from_ref(step),
            ChildItem::LoadSelection(steps)
            | ChildItem::CalibrationExecution(steps)
            | ChildItem::UnilateralSet(steps) => steps,
        }
    }

    pub fn steps_mut(&mut self) -> &mut [SessionStep] {
        match self {
            ChildItem::Normal(step) => std::slice::from_mut(step),
            ChildItem::LoadSelection(steps)
            | ChildItem::CalibrationExecution(steps)
            | ChildItem::UnilateralSet(steps) => steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps().is_empty()
    }
}

/// A grouping of steps belonging to one exercise or one superset
#[derive(Clone, Debug, PartialEq)]
pub enum Container {
    Exercise {
        exercise_id: String,
        items: Vec<ChildItem>,
    },
    Superset {
        steps: Vec<SessionStep>,
    },
}

/// One entry of the full session sequence
#[derive(Clone, Debug, PartialEq)]
pub enum SequenceItem {
    Container(Container),
    RestBetweenExercises(Box<RestStep>),
}

// ============================================================================
// Flattening
// ============================================================================

/// Expand all containers and child items, in order, into the linear step
/// list that drives navigation. Steps are cloned; outcome cells are shared.
pub fn flatten(sequence: &[SequenceItem]) -> Vec<SessionStep> {
    let mut flat = Vec::new();
    for item in sequence {
        match item {
            SequenceItem::Container(Container::Exercise { items, .. }) => {
                for child in items {
                    flat.extend(child.steps().iter().cloned());
                }
            }
            SequenceItem::Container(Container::Superset { steps }) => {
                flat.extend(steps.iter().cloned());
            }
            SequenceItem::RestBetweenExercises(rest) => {
                flat.push(SessionStep::Rest(rest.clone()));
            }
        }
    }
    flat
}

/// Address of one step inside the hierarchical form.
///
/// For superset containers `child` is the step index and `within` is 0; for a
/// rest-between-exercises both are 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StepPath {
    pub seq: usize,
    pub child: usize,
    pub within: usize,
}

/// The hierarchical address of every flattened step, in traversal order
pub(crate) fn flat_paths(sequence: &[SequenceItem]) -> Vec<StepPath> {
    let mut paths = Vec::new();
    for (seq_idx, item) in sequence.iter().enumerate() {
        match item {
            SequenceItem::Container(Container::Exercise { items, .. }) => {
                for (child_idx, child) in items.iter().enumerate() {
                    for within in 0..child.steps().len() {
                        paths.push(StepPath {
                            seq: seq_idx,
                            child: child_idx,
                            within,
                        });
                    }
                }
            }
            SequenceItem::Container(Container::Superset { steps }) => {
                for child_idx in 0..steps.len() {
                    paths.push(StepPath {
                        seq: seq_idx,
                        child: child_idx,
                        within: 0,
                    });
                }
            }
            SequenceItem::RestBetweenExercises(_) => {
                paths.push(StepPath {
                    seq: seq_idx,
                    child: 0,
                    within: 0,
                });
            }
        }
    }
    paths
}

// ============================================================================
// Invariant Maintenance
// ============================================================================

/// Enforce the rest invariants on the flattened projection: no leading rest,
/// no trailing rest, no two adjacent rests. Redundant rests are removed from
/// their owning containers; emptied child items and containers are dropped.
pub fn normalize(sequence: Vec<SequenceItem>) -> Vec<SequenceItem> {
    let flat = flatten(&sequence);
    let paths = flat_paths(&sequence);

    let mut keep = vec![true; flat.len()];

    // Forward pass: a rest may only follow a kept non-rest step
    let mut prev_is_step = false;
    for (i, step) in flat.iter().enumerate() {
        if step.is_rest() {
            if !prev_is_step {
                keep[i] = false;
            } else {
                prev_is_step = false;
            }
        } else {
            prev_is_step = true;
        }
    }

    // Backward pass: a rest may only precede a kept non-rest step
    let mut next_is_step = false;
    for i in (0..flat.len()).rev() {
        if !keep[i] {
            continue;
        }
        if flat[i].is_rest() {
            if !next_is_step {
                keep[i] = false;
            }
            // A kept rest does not count as a following step for the one
            // before it; adjacent rests collapse to the earlier survivor
        } else {
            next_is_step = true;
        }
    }

    let removed: Vec<StepPath> = paths
        .iter()
        .zip(&keep)
        .filter(|(_, k)| !**k)
        .map(|(p, _)| *p)
        .collect();

    if removed.is_empty() {
        return sequence;
    }
    tracing::debug!(count = removed.len(), "removing redundant rest steps");
    remove_paths(sequence, &removed)
}

/// Rebuild the sequence without the steps at the given paths
pub(crate) fn remove_paths(sequence: Vec<SequenceItem>, removed: &[StepPath]) -> Vec<SequenceItem> {
    let is_removed = |seq: usize, child: usize, within: usize| {
        removed
            .iter()
            .any(|p| p.seq == seq && p.child == child && p.within == within)
    };

    let mut out = Vec::with_capacity(sequence.len());
    for (seq_idx, item) in sequence.into_iter().enumerate() {
        match item {
            SequenceItem::Container(Container::Exercise { exercise_id, items }) => {
                let mut new_items = Vec::with_capacity(items.len());
                for (child_idx, child) in items.into_iter().enumerate() {
                    let rebuilt = match child {
                        ChildItem::Normal(step) => {
                            if is_removed(seq_idx, child_idx, 0) {
                                continue;
                            }
                            ChildItem::Normal(step)
                        }
                        ChildItem::LoadSelection(steps) => ChildItem::LoadSelection(
                            filter_block(steps, seq_idx, child_idx, &is_removed),
                        ),
                        ChildItem::CalibrationExecution(steps) => ChildItem::CalibrationExecution(
                            filter_block(steps, seq_idx, child_idx, &is_removed),
                        ),
                        ChildItem::UnilateralSet(steps) => ChildItem::UnilateralSet(
                            filter_block(steps, seq_idx, child_idx, &is_removed),
                        ),
                    };
                    if !rebuilt.is_empty() {
                        new_items.push(rebuilt);
                    }
                }
                if !new_items.is_empty() {
                    out.push(SequenceItem::Container(Container::Exercise {
                        exercise_id,
                        items: new_items,
                    }));
                }
            }
            SequenceItem::Container(Container::Superset { steps }) => {
                let steps: Vec<SessionStep> = steps
                    .into_iter()
                    .enumerate()
                    .filter(|(child_idx, _)| !is_removed(seq_idx, *child_idx, 0))
                    .map(|(_, s)| s)
                    .collect();
                if !steps.is_empty() {
                    out.push(SequenceItem::Container(Container::Superset { steps }));
                }
            }
            SequenceItem::RestBetweenExercises(rest) => {
                if !is_removed(seq_idx, 0, 0) {
                    out.push(SequenceItem::RestBetweenExercises(rest));
                }
            }
        }
    }
    out
}

fn filter_block(
    steps: Vec<SessionStep>,
    seq_idx: usize,
    child_idx: usize,
    is_removed: &impl Fn(usize, usize, usize) -> bool,
) -> Vec<SessionStep> {
    steps
        .into_iter()
        .enumerate()
        .filter(|(within, _)| !is_removed(seq_idx, child_idx, *within))
        .map(|(_, s)| s)
        .collect()
}

/// Reassign order indices so they are unique and increasing in traversal
/// order within each container. The two sets of a unilateral unit share one
/// order on purpose: they are the same slot performed once per side, and
/// resumption counts their repeated identity.
pub fn reindex(sequence: &mut [SequenceItem]) {
    for item in sequence.iter_mut() {
        match item {
            SequenceItem::Container(Container::Exercise { items, .. }) => {
                let mut counter = 0u32;
                for child in items.iter_mut() {
                    match child {
                        ChildItem::UnilateralSet(steps) => {
                            let order = counter;
                            counter += 1;
                            for step in steps.iter_mut() {
                                assign_order(step, order);
                            }
                        }
                        other => {
                            for step in other.steps_mut() {
                                assign_order(step, counter);
                                counter += 1;
                            }
                        }
                    }
                }
            }
            SequenceItem::Container(Container::Superset { steps }) => {
                for (i, step) in steps.iter_mut().enumerate() {
                    assign_order(step, i as u32);
                }
            }
            SequenceItem::RestBetweenExercises(rest) => {
                rest.order = 0;
            }
        }
    }
}

fn assign_order(step: &mut SessionStep, order: u32) {
    match step {
        SessionStep::Set(s) => s.order = order,
        SessionStep::Rest(r) => r.order = order,
        SessionStep::CalibrationLoadSelection(c) => c.order = order,
        // Prompt identity follows its originating set
        SessionStep::CalibrationRirSelection(_)
        | SessionStep::AutoRegulationRirSelection(_)
        | SessionStep::Preparing
        | SessionStep::Warmup
        | SessionStep::Finished { .. } => {}
    }
}

/// Recompute every rest's weak reference to the step that follows it.
///
/// The reference always names a step later in the current flattened sequence;
/// it must be refreshed after every structural edit so it never dangles.
pub fn recompute_rest_next(sequence: &mut [SequenceItem]) {
    let flat = flatten(sequence);

    // Identity of the first non-rest, identity-bearing step after each index
    let mut following: Vec<Option<StepIdentity>> = vec![None; flat.len()];
    let mut next: Option<StepIdentity> = None;
    for i in (0..flat.len()).rev() {
        following[i] = next.clone();
        if !flat[i].is_rest() {
            if let Some(identity) = flat[i].identity() {
                next = Some(identity);
            }
        }
    }

    let mut flat_idx = 0usize;
    for item in sequence.iter_mut() {
        match item {
            SequenceItem::Container(Container::Exercise { items, .. }) => {
                for child in items.iter_mut() {
                    for step in child.steps_mut() {
                        assign_rest_next(step, &following, &mut flat_idx);
                    }
                }
            }
            SequenceItem::Container(Container::Superset { steps }) => {
                for step in steps.iter_mut() {
                    assign_rest_next(step, &following, &mut flat_idx);
                }
            }
            SequenceItem::RestBetweenExercises(rest) => {
                rest.next = following.get(flat_idx).cloned().flatten();
                flat_idx += 1;
            }
        }
    }
}

fn assign_rest_next(
    step: &mut SessionStep,
    following: &[Option<StepIdentity>],
    flat_idx: &mut usize,
) {
    if let SessionStep::Rest(rest) = step {
        rest.next = following.get(*flat_idx).cloned().flatten();
    }
    *flat_idx += 1;
}
