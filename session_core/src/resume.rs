//! Resumption after a restart and repositioning after a mid-session rebuild.
//!
//! Both operations work purely on flattened step lists and stable step
//! identities, so they stay correct no matter how the hierarchical sequence
//! was edited in between.

use crate::machine::SessionMachine;
use crate::sequence::SequenceItem;
use crate::step::SessionStep;
use crate::types::{Catalog, SetRecord};
use tracing::debug;

/// Where to land when reopening a half-finished session.
///
/// An in-flight record wins: we place the user on the rest that follows its
/// set, so they re-enter mid-recovery rather than on a set they already did.
/// Otherwise the resume point is the first set-like step with no committed
/// record, restricted to exercises that persist history. A fully matched
/// sequence resumes at the last index; an empty history resumes at the start.
pub fn find_resumption_index(
    flat: &[SessionStep],
    executed: &[SetRecord],
    active: Option<&SetRecord>,
    catalog: &Catalog,
) -> usize {
    if flat.is_empty() {
        return 0;
    }

    if let Some(record) = active {
        if let Some(idx) = flat.iter().position(|step| {
            step.is_set_like()
                && step.exercise_id() == Some(record.exercise_id.as_str())
                && step.identity().map(|id| id.order) == Some(record.order)
        }) {
            let resume_at = match flat.get(idx + 1) {
                Some(following) if following.is_rest() => idx + 1,
                _ => idx,
            };
            debug!(index = resume_at, "resuming at active record");
            return resume_at;
        }
    }

    if executed.is_empty() {
        return 0;
    }

    // Per-slot budget of committed records; a repeated identity (unilateral
    // pair) needs one record per occurrence before it counts as done.
    let mut remaining: Vec<(&str, u32)> = executed
        .iter()
        .map(|r| (r.exercise_id.as_str(), r.order))
        .collect();

    for (idx, step) in flat.iter().enumerate() {
        if !step.is_set_like() {
            continue;
        }
        let Some(exercise_id) = step.exercise_id() else {
            continue;
        };
        let stores = catalog
            .exercises
            .get(exercise_id)
            .map_or(true, |def| def.stores_history);
        if !stores {
            continue;
        }
        let order = match step.identity() {
            Some(id) => id.order,
            None => continue,
        };
        match remaining
            .iter()
            .position(|&(ex, ord)| ex == exercise_id && ord == order)
        {
            Some(pos) => {
                remaining.swap_remove(pos);
            }
            None => {
                debug!(index = idx, exercise = exercise_id, "resuming at first unmatched step");
                return idx;
            }
        }
    }

    // everything matched: the session was effectively finished
    flat.len() - 1
}

/// Reposition a flat index across a sequence regeneration.
///
/// The current step's identity can occur more than once (unilateral pairs),
/// so the landing spot is the occurrence with the same ordinal: count the
/// prior occurrences in the old list and take the matching one in the new.
pub fn refresh_index(
    old_flat: &[SessionStep],
    old_index: usize,
    new_flat: &[SessionStep],
) -> usize {
    let clamp = |idx: usize| idx.min(new_flat.len().saturating_sub(1));

    let Some(current) = old_flat.get(old_index) else {
        return clamp(old_index);
    };
    let Some(identity) = current.identity() else {
        return clamp(old_index);
    };

    let same = |step: &SessionStep| {
        step.identity()
            .map(|id| id.set_id == identity.set_id && id.exercise_id == identity.exercise_id)
            == Some(true)
    };

    let k = old_flat[..old_index].iter().filter(|s| same(s)).count();

    let mut seen = 0usize;
    let mut last_match = None;
    for (idx, step) in new_flat.iter().enumerate() {
        if same(step) {
            if seen == k {
                return idx;
            }
            seen += 1;
            last_match = Some(idx);
        }
    }

    // fewer occurrences survived the rebuild; land on the last one left
    last_match.map_or_else(|| clamp(old_index), clamp)
}

/// Swap in a regenerated sequence and land one step past the repositioned
/// occurrence, the convention for every mid-session rebuild.
pub fn refresh_after_regeneration(
    machine: &SessionMachine,
    new_sequence: Vec<SequenceItem>,
) -> SessionMachine {
    let old_flat = machine.all_states();
    let old_index = machine.current_index();
    let rebuilt = machine.with_sequence(new_sequence, 0);
    let landing = refresh_index(&old_flat, old_index, &rebuilt.all_states());
    let repositioned = rebuilt.with_current_index(landing);
    if repositioned.is_completed() {
        repositioned
    } else {
        repositioned.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::build_default_catalog;
    use crate::sequence::{ChildItem, Container, SequenceItem};
    use crate::step::RestStep;
    use crate::testutil::{make_set, rest_step, set_step};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(exercise_id: &str, order: u32) -> SetRecord {
        SetRecord {
            id: Uuid::new_v4(),
            workout_history_id: Uuid::new_v4(),
            set_id: Uuid::new_v4(),
            exercise_id: exercise_id.into(),
            order,
            load: 60.0,
            reps: 5,
            rir: None,
            performed_at: Utc::now(),
        }
    }

    fn flat_of_sets(exercise_id: &str, count: u32) -> Vec<SessionStep> {
        (0..count)
            .map(|i| set_step(exercise_id, i, 60.0, 5))
            .collect()
    }

    #[test]
    fn test_resumption_determinism_first_k_matched() {
        let catalog = build_default_catalog();
        let flat = flat_of_sets("squat", 4);
        for k in 0..4u32 {
            let executed: Vec<SetRecord> = (0..k).map(|i| record("squat", i)).collect();
            assert_eq!(
                find_resumption_index(&flat, &executed, None, &catalog),
                k as usize,
                "k = {}",
                k
            );
        }
    }

    #[test]
    fn test_fully_matched_resumes_at_last_index() {
        let catalog = build_default_catalog();
        let flat = flat_of_sets("squat", 3);
        let executed: Vec<SetRecord> = (0..3).map(|i| record("squat", i)).collect();
        assert_eq!(find_resumption_index(&flat, &executed, None, &catalog), 2);
    }

    #[test]
    fn test_active_record_resumes_at_following_rest() {
        let catalog = build_default_catalog();
        let flat = vec![
            set_step("squat", 0, 60.0, 5),
            rest_step("squat", 180_000),
            set_step("squat", 1, 60.0, 5),
            rest_step("squat", 180_000),
            set_step("squat", 2, 60.0, 5),
        ];
        let active = record("squat", 1);
        assert_eq!(
            find_resumption_index(&flat, &[], Some(&active), &catalog),
            3
        );
    }

    #[test]
    fn test_active_record_without_following_rest_resumes_at_set() {
        let catalog = build_default_catalog();
        let flat = flat_of_sets("squat", 2);
        let active = record("squat", 1);
        assert_eq!(
            find_resumption_index(&flat, &[], Some(&active), &catalog),
            1
        );
    }

    #[test]
    fn test_non_history_exercises_are_skipped() {
        let catalog = build_default_catalog();
        // plank does not store history, so it can never block resumption
        let flat = vec![
            set_step("squat", 0, 60.0, 5),
            set_step("plank", 0, 0.0, 1),
            set_step("squat", 1, 60.0, 5),
        ];
        let executed = vec![record("squat", 0)];
        assert_eq!(find_resumption_index(&flat, &executed, None, &catalog), 2);
    }

    #[test]
    fn test_repeated_identity_needs_one_record_per_side() {
        let catalog = build_default_catalog();
        // a unilateral pair shares its order; one record covers one side
        let side = set_step("db_split_squat", 0, 12.0, 10);
        let flat = vec![side.clone(), side];
        let executed = vec![record("db_split_squat", 0)];
        assert_eq!(find_resumption_index(&flat, &executed, None, &catalog), 1);
    }

    #[test]
    fn test_empty_history_resumes_at_zero() {
        let catalog = build_default_catalog();
        let flat = flat_of_sets("squat", 3);
        assert_eq!(find_resumption_index(&flat, &[], None, &catalog), 0);
    }

    #[test]
    fn test_refresh_lands_on_same_occurrence_ordinal() {
        let a = set_step("squat", 0, 60.0, 5);
        let b = set_step("squat", 1, 60.0, 5);
        let old = vec![a.clone(), b.clone()];
        // rebuilt with a warm-up inserted ahead of both sets
        let new = vec![set_step("squat", 9, 30.0, 8), a, b];
        assert_eq!(refresh_index(&old, 1, &new), 2);
    }

    #[test]
    fn test_refresh_distinguishes_unilateral_duplicates() {
        let side = set_step("db_split_squat", 0, 12.0, 10);
        let old = vec![side.clone(), side.clone()];
        let new = vec![set_step("squat", 0, 60.0, 5), side.clone(), side];
        // on the second occurrence before the rebuild, still the second after
        assert_eq!(refresh_index(&old, 1, &new), 2);
    }

    #[test]
    fn test_refresh_clamps_when_occurrence_dropped() {
        let a = set_step("squat", 0, 60.0, 5);
        let b = set_step("squat", 1, 60.0, 5);
        let old = vec![a.clone(), b];
        // the current step's identity no longer exists after the rebuild
        let new = vec![a];
        assert_eq!(refresh_index(&old, 1, &new), 0);
    }

    #[test]
    fn test_refresh_after_regeneration_advances_once() {
        let a = make_set("squat", 0, 60.0, 5);
        let b = make_set("squat", 1, 60.0, 5);
        let sequence = vec![SequenceItem::Container(Container::Exercise {
            exercise_id: "squat".into(),
            items: vec![
                ChildItem::Normal(SessionStep::Set(Box::new(a))),
                ChildItem::Normal(SessionStep::Rest(Box::new(RestStep::new(
                    90_000, "squat",
                )))),
                ChildItem::Normal(SessionStep::Set(Box::new(b))),
            ],
        })];
        let machine = SessionMachine::new(sequence.clone(), Utc::now());
        // position on the first set (index 2 after the two bootstrap steps)
        let machine = machine.with_current_index(2);

        let refreshed = refresh_after_regeneration(&machine, sequence);
        // same occurrence found at the same place, advanced one past it
        assert_eq!(refreshed.current_index(), 3);
    }
}
