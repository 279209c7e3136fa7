//! Superset assembly: fair round-robin interleaving of several exercises'
//! step queues into one sequence.
//!
//! Two phases: warm-ups are hoisted to the front (interleaved per exercise,
//! never separated by rest), then work sets are dealt one per exercise per
//! round with a single round-closing rest from the superset's per-exercise
//! rest map. A cleanup pass restores the rest invariants.

use crate::step::{RestStep, SessionStep};
use std::collections::{HashMap, VecDeque};

/// Interleave per-exercise step queues into one superset step list.
///
/// Queues are visited in their configured order every round; the exercises
/// of a round run back-to-back, then a single rest closes the round, sized
/// from the rest map entry of the round's closing exercise and emitted only
/// when that duration is positive. An exhausted queue is skipped for
/// remaining rounds.
pub fn assemble_superset_child_states(
    per_exercise_queues: Vec<(String, Vec<SessionStep>)>,
    rest_by_exercise: &HashMap<String, i64>,
) -> Vec<SessionStep> {
    let mut queues: Vec<(String, VecDeque<SessionStep>)> = per_exercise_queues
        .into_iter()
        .map(|(id, steps)| (id, steps.into_iter().collect()))
        .collect();

    let mut out = Vec::new();

    // Phase a: hoist warm-ups round-robin, discarding the rest that trails
    // each hoisted warm-up (warm-ups are never separated by rest)
    loop {
        let mut hoisted = false;
        for (_, queue) in queues.iter_mut() {
            let front_is_warmup =
                matches!(queue.front(), Some(SessionStep::Set(s)) if s.is_warmup);
            if !front_is_warmup {
                continue;
            }
            if let Some(warmup) = queue.pop_front() {
                out.push(warmup);
                hoisted = true;
            }
            if matches!(queue.front(), Some(step) if step.is_rest()) {
                queue.pop_front();
            }
        }
        if !hoisted {
            break;
        }
    }

    // Phase b: one work set per exercise per round
    let rounds = queues
        .iter()
        .map(|(_, q)| q.iter().filter(|s| is_work_set(s)).count())
        .min()
        .unwrap_or(0);

    for _ in 0..rounds {
        let mut round_closer: Option<String> = None;
        for (exercise_id, queue) in queues.iter_mut() {
            // Inter-set rests inside the source queue are replaced by the
            // superset's own rest map
            while matches!(queue.front(), Some(step) if step.is_rest()) {
                queue.pop_front();
            }
            let Some(set) = queue.pop_front() else {
                continue; // exhausted queue, skip for remaining rounds
            };
            out.push(set);
            round_closer = Some(exercise_id.clone());
        }

        if let Some(exercise_id) = round_closer {
            let rest_ms = rest_by_exercise.get(&exercise_id).copied().unwrap_or(0);
            if rest_ms > 0 {
                out.push(SessionStep::Rest(Box::new(RestStep::new(
                    rest_ms,
                    exercise_id,
                ))));
            }
        }
    }

    cleanup_rests(out)
}

fn is_work_set(step: &SessionStep) -> bool {
    matches!(step, SessionStep::Set(s) if !s.is_warmup)
}

/// Remove leading/trailing rests and collapse consecutive rests so the
/// assembled list never opens, closes, or stalls on back-to-back rest
fn cleanup_rests(steps: Vec<SessionStep>) -> Vec<SessionStep> {
    let mut kept: Vec<SessionStep> = Vec::with_capacity(steps.len());
    for step in steps {
        if step.is_rest() {
            match kept.last() {
                None => continue,
                Some(last) if last.is_rest() => continue,
                Some(_) => {}
            }
        }
        kept.push(step);
    }
    while kept.last().map(SessionStep::is_rest).unwrap_or(false) {
        kept.pop();
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{rest_step, set_step, warmup_step};

    fn queue_with_warmup(id: &str, work_sets: usize) -> (String, Vec<SessionStep>) {
        let mut steps = vec![warmup_step(id, 0, 30.0, 8), rest_step(id, 45_000)];
        for i in 0..work_sets {
            steps.push(set_step(id, i as u32 + 1, 60.0, 8));
            if i + 1 < work_sets {
                steps.push(rest_step(id, 90_000));
            }
        }
        (id.into(), steps)
    }

    fn pattern(out: &[SessionStep]) -> Vec<&str> {
        out.iter()
            .map(|s| match s {
                SessionStep::Set(set) => set.exercise_id.as_str(),
                SessionStep::Rest(_) => "rest",
                _ => "other",
            })
            .collect()
    }

    #[test]
    fn test_shared_rest_closes_each_round_once() {
        let queues = vec![
            ("row".to_string(), (0..3).map(|i| set_step("row", i, 50.0, 10)).collect()),
            ("press".to_string(), (0..3).map(|i| set_step("press", i, 40.0, 10)).collect()),
        ];
        // Both exercises carry the same positive rest; a round still gets
        // exactly one rest, after its last set
        let rest = HashMap::from([("row".to_string(), 90_000), ("press".to_string(), 90_000)]);

        let out = assemble_superset_child_states(queues, &rest);
        assert_eq!(
            pattern(&out),
            vec!["row", "press", "rest", "row", "press", "rest", "row", "press"]
        );
    }

    #[test]
    fn test_round_rest_sized_from_closing_exercise() {
        let queues = vec![
            ("row".to_string(), (0..2).map(|i| set_step("row", i, 50.0, 10)).collect()),
            ("press".to_string(), (0..2).map(|i| set_step("press", i, 40.0, 10)).collect()),
        ];
        let rest = HashMap::from([("row".to_string(), 60_000), ("press".to_string(), 120_000)]);

        let out = assemble_superset_child_states(queues, &rest);
        assert_eq!(pattern(&out), vec!["row", "press", "rest", "row", "press"]);
        let round_rest = out[2].as_rest().unwrap();
        assert_eq!(round_rest.spec.duration_ms, 120_000);
        assert_eq!(round_rest.exercise_id, "press");
    }

    #[test]
    fn test_warmups_hoisted_to_front_without_rests() {
        let queues = vec![queue_with_warmup("row", 2), queue_with_warmup("press", 2)];
        let rest = HashMap::from([("row".to_string(), 60_000), ("press".to_string(), 60_000)]);

        let out = assemble_superset_child_states(queues, &rest);

        // Two interleaved warm-ups first, no rest between them
        assert!(matches!(&out[0], SessionStep::Set(s) if s.is_warmup && s.exercise_id == "row"));
        assert!(matches!(&out[1], SessionStep::Set(s) if s.is_warmup && s.exercise_id == "press"));
        assert!(!out[2].is_rest());
    }

    #[test]
    fn test_rounds_bounded_by_shortest_queue() {
        let queues = vec![
            ("row".to_string(), (0..4).map(|i| set_step("row", i, 50.0, 10)).collect()),
            ("press".to_string(), (0..2).map(|i| set_step("press", i, 40.0, 10)).collect()),
        ];
        let rest = HashMap::from([("row".to_string(), 0), ("press".to_string(), 0)]);

        let out = assemble_superset_child_states(queues, &rest);
        let work_sets = out.iter().filter(|s| is_work_set(s)).count();
        assert_eq!(work_sets, 4); // 2 rounds x 2 exercises
    }

    #[test]
    fn test_zero_closing_rest_emits_no_rest() {
        let queues = vec![
            ("row".to_string(), vec![set_step("row", 0, 50.0, 10), set_step("row", 1, 50.0, 10)]),
            ("press".to_string(), vec![set_step("press", 0, 40.0, 10), set_step("press", 1, 40.0, 10)]),
        ];
        // Press closes every round and its rest is 0
        let rest = HashMap::from([("row".to_string(), 90_000), ("press".to_string(), 0)]);

        let out = assemble_superset_child_states(queues, &rest);
        assert_eq!(pattern(&out), vec!["row", "press", "row", "press"]);
    }

    #[test]
    fn test_empty_queues_produce_empty_output() {
        let out = assemble_superset_child_states(vec![], &HashMap::new());
        assert!(out.is_empty());
    }
}
