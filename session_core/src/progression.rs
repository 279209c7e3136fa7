//! Double-progression decision and planning.
//!
//! This module turns an exercise's rolling counters and its most recent
//! achieved sets into a verdict and a concrete set-by-set plan:
//! - Reps increase within the rep range before load increases
//! - Load jumps snap to the equipment's finite load ladder
//! - Plateaus unlock a larger jump after enough stalled sessions
//! - A retry replays the last successful session exactly
//! - The deload branch is fully implemented but gated by a config switch

use crate::{
    nearest_load, round2, ExerciseDefinition, ExerciseRollingState, JumpPolicy, PlannedSession,
    PlannedSet, ProgressionVerdict, RepsRange, SessionDecision, SessionPlan,
};
use chrono::{DateTime, Datelike, Utc};

/// Progression policy resolved from configuration
#[derive(Clone, Copy, Debug)]
pub struct ProgressionPolicy {
    pub jump: JumpPolicy,
    pub deload_enabled: bool,
    pub deload_fraction: f64,
}

/// Completions counted for the ISO week containing `now`.
///
/// The stored counter is keyed to the ISO week (Monday-anchored) of
/// `weekly_completion_update_date`; a counter from any other week counts as 0.
pub fn completions_this_week(state: &ExerciseRollingState, now: DateTime<Utc>) -> u32 {
    match state.weekly_completion_update_date {
        Some(updated) => {
            let a = updated.iso_week();
            let b = now.iso_week();
            if a.year() == b.year() && a.week() == b.week() {
                state.times_completed_in_a_week
            } else {
                0
            }
        }
        None => 0,
    }
}

/// Derive the session verdict from the exercise's rolling counters
pub fn decide_session(
    state: &ExerciseRollingState,
    now: DateTime<Utc>,
    deload_enabled: bool,
) -> SessionDecision {
    let deload = deload_enabled && state.session_failed_counter >= 2 && !state.last_session_was_deload;

    let retry = !state.last_session_was_deload
        && (state.session_failed_counter >= 1 || completions_this_week(state, now) > 1);

    let verdict = if deload {
        ProgressionVerdict::Deload
    } else if retry {
        ProgressionVerdict::Retry
    } else {
        ProgressionVerdict::Progress
    };

    let load_last_successful = retry || state.last_session_was_deload;

    tracing::debug!(
        fails = state.session_failed_counter,
        last_was_deload = state.last_session_was_deload,
        ?verdict,
        "session decision"
    );

    SessionDecision {
        verdict,
        load_last_successful,
        last_successful: state.last_successful_session.clone(),
    }
}

/// Plan the next session from the previous session's achieved sets.
///
/// Per set: below the rep ceiling, add one rep at the same load; at the
/// ceiling, move to the smallest available load at or above
/// `load * (1 + default_pct)` and reset reps to the bottom of the range.
/// Once `stalled_sessions` reaches the policy's `overcap_until`, the jump
/// target grows to `max_pct` to break the plateau (falling back to the
/// smallest load above the current one if nothing reaches that target).
///
/// Returns `None` when `available_loads` is empty: planning is skipped for
/// the exercise rather than raising.
pub fn plan_next_session(
    previous_sets: &[PlannedSet],
    available_loads: &[f64],
    reps_range: RepsRange,
    jump: &JumpPolicy,
    stalled_sessions: u32,
) -> Option<SessionPlan> {
    if available_loads.is_empty() {
        tracing::debug!("no available loads, skipping plan");
        return None;
    }

    let plateau = stalled_sessions >= jump.overcap_until;
    let mut sets = Vec::with_capacity(previous_sets.len());
    let mut previous_volume = 0.0;

    for prev in previous_sets {
        // Loads are never interpolated, only snapped to the ladder
        let load = nearest_load(available_loads, prev.load)?;
        previous_volume += load * f64::from(prev.reps);

        if prev.reps < reps_range.max {
            sets.push(PlannedSet::new(load, (prev.reps + 1).min(reps_range.max)));
            continue;
        }

        let pct = if plateau { jump.max_pct } else { jump.default_pct };
        let target = load * (1.0 + pct);
        let mut next = available_loads.iter().copied().find(|l| *l >= target);
        if next.is_none() && plateau {
            next = available_loads.iter().copied().find(|l| *l > load);
        }

        match next {
            Some(next_load) if next_load > load => {
                sets.push(PlannedSet::new(next_load, reps_range.min));
            }
            _ => {
                // Top of the ladder: hold. The caller detects the stall via
                // equal volumes and reclassifies the verdict to Failed.
                sets.push(PlannedSet::new(load, reps_range.max));
            }
        }
    }

    let new_volume: f64 = sets.iter().map(PlannedSet::volume).sum();

    Some(SessionPlan {
        sets,
        previous_volume,
        new_volume,
    })
}

/// Plan a deload session: reduce load by a fixed fraction, snapped to the
/// ladder, holding reps clamped inside the range.
pub fn plan_deload_session(
    previous_sets: &[PlannedSet],
    available_loads: &[f64],
    reps_range: RepsRange,
    fraction: f64,
) -> Option<SessionPlan> {
    if available_loads.is_empty() {
        return None;
    }

    let mut sets = Vec::with_capacity(previous_sets.len());
    let mut previous_volume = 0.0;

    for prev in previous_sets {
        previous_volume += prev.volume();
        let load = nearest_load(available_loads, prev.load * (1.0 - fraction))?;
        sets.push(PlannedSet::new(load, reps_range.clamp(prev.reps)));
    }

    let new_volume: f64 = sets.iter().map(PlannedSet::volume).sum();

    Some(SessionPlan {
        sets,
        previous_volume,
        new_volume,
    })
}

/// Full per-exercise planning: decision plus plan.
///
/// `previous` is the most recent session's achieved sets from history
/// (`None` for a first-ever session, which falls back to the nominal
/// definition with a `Progress` verdict). Returns `None` when no plan can
/// be produced (empty load ladder).
pub fn plan_session(
    def: &ExerciseDefinition,
    rolling: &ExerciseRollingState,
    previous: Option<&[PlannedSet]>,
    available_loads: &[f64],
    policy: &ProgressionPolicy,
    now: DateTime<Utc>,
) -> Option<PlannedSession> {
    if available_loads.is_empty() {
        tracing::debug!(exercise = %def.id, "no achievable loads, no progression entry");
        return None;
    }

    let decision = decide_session(rolling, now, policy.deload_enabled);

    let base: Option<Vec<PlannedSet>> = if decision.load_last_successful {
        decision.last_successful.clone().or_else(|| previous.map(<[_]>::to_vec))
    } else {
        previous.map(<[_]>::to_vec)
    };

    let Some(base) = base else {
        // First-ever session: nominal definition, Progress by convention
        let load = nearest_load(available_loads, def.nominal_load)?;
        let sets = vec![PlannedSet::new(load, def.reps_range.min); def.set_count as usize];
        let new_volume = sets.iter().map(PlannedSet::volume).sum();
        return Some(PlannedSession {
            verdict: ProgressionVerdict::Progress,
            plan: SessionPlan {
                sets,
                previous_volume: 0.0,
                new_volume,
            },
        });
    };

    match decision.verdict {
        ProgressionVerdict::Deload => {
            let plan =
                plan_deload_session(&base, available_loads, def.reps_range, policy.deload_fraction)?;
            Some(PlannedSession {
                verdict: ProgressionVerdict::Deload,
                plan,
            })
        }
        ProgressionVerdict::Retry => {
            // A failing user retries the same target rather than drifting down
            let sets: Vec<PlannedSet> = base
                .iter()
                .filter_map(|s| {
                    nearest_load(available_loads, s.load).map(|l| PlannedSet::new(l, s.reps))
                })
                .collect();
            let volume: f64 = sets.iter().map(PlannedSet::volume).sum();
            Some(PlannedSession {
                verdict: ProgressionVerdict::Retry,
                plan: SessionPlan {
                    sets,
                    previous_volume: volume,
                    new_volume: volume,
                },
            })
        }
        ProgressionVerdict::Progress | ProgressionVerdict::Failed => {
            let plan = plan_next_session(
                &base,
                available_loads,
                def.reps_range,
                &policy.jump,
                rolling.sessions_without_load_increase,
            )?;
            let verdict = if plan.is_stalled() {
                tracing::info!(exercise = %def.id, "no viable progression found");
                ProgressionVerdict::Failed
            } else {
                ProgressionVerdict::Progress
            };
            Some(PlannedSession { verdict, plan })
        }
    }
}

/// Best-effort rolling-state backfill after a session completes.
///
/// Success (every target set matched or beaten) resets the fail counter,
/// bumps the success and ISO-week counters and stores the achieved sets as
/// the last successful session; failure bumps the fail counter. The plateau
/// counter resets whenever the achieved top load exceeds the previous
/// successful top load.
pub fn record_session_result(
    state: &mut ExerciseRollingState,
    achieved: &[PlannedSet],
    target: &[PlannedSet],
    was_deload: bool,
    now: DateTime<Utc>,
) {
    let success = !achieved.is_empty()
        && achieved.len() >= target.len()
        && target
            .iter()
            .zip(achieved)
            .all(|(t, a)| a.reps >= t.reps && a.load + 1e-9 >= t.load);

    let top = |sets: &[PlannedSet]| sets.iter().map(|s| s.load).fold(f64::MIN, f64::max);

    if success {
        let previous_top = state.last_successful_session.as_deref().map(top);
        if previous_top.is_some_and(|p| top(achieved) > p + 1e-9) {
            state.sessions_without_load_increase = 0;
        } else {
            state.sessions_without_load_increase += 1;
        }

        state.session_failed_counter = 0;
        state.successful_session_counter += 1;
        state.times_completed_in_a_week = completions_this_week(state, now) + 1;
        state.weekly_completion_update_date = Some(now);

        let achieved_volume: f64 = achieved.iter().map(PlannedSet::volume).sum();
        let best_volume: f64 = state
            .best_session
            .as_deref()
            .map(|s| s.iter().map(PlannedSet::volume).sum())
            .unwrap_or(0.0);
        if round2(achieved_volume) > round2(best_volume) {
            state.best_session = Some(achieved.to_vec());
        }
        state.last_successful_session = Some(achieved.to_vec());
    } else {
        state.session_failed_counter += 1;
        state.sessions_without_load_increase += 1;
    }

    if was_deload {
        // A deload wipes the streaks either way
        state.session_failed_counter = 0;
        state.successful_session_counter = 0;
    }
    state.last_session_was_deload = was_deload;
}
