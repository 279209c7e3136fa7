//! Wall-clock timer service for timed sets and rests.
//!
//! - Count-down entries (rests, timed-duration sets) decrement from a total
//! - Count-up entries (endurance sets) accumulate elapsed time, with an
//!   optional auto-stop target
//! - All values are recomputed from `now - started_at` on every tick, so a
//!   suspended process shows correct values on the next tick instead of
//!   drifting by however long it was asleep
//! - A background thread ticks once per wall-clock second and exits when the
//!   registry drains; it is respawned lazily on the next registration

use crate::step::{OutcomeCell, StepIdentity};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Hooks invoked by the service. All default to no-ops.
pub struct TimerCallbacks {
    pub on_timer_enabled: Box<dyn Fn(&StepIdentity) + Send + Sync>,
    pub on_timer_end: Box<dyn Fn(&StepIdentity) + Send + Sync>,
    pub on_timer_disabled: Box<dyn Fn(&StepIdentity) + Send + Sync>,
}

impl Default for TimerCallbacks {
    fn default() -> Self {
        Self {
            on_timer_enabled: Box::new(|_| {}),
            on_timer_end: Box::new(|_| {}),
            on_timer_disabled: Box::new(|_| {}),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    CountDown { total_ms: i64 },
    CountUp { auto_stop_ms: Option<i64> },
}

struct Entry {
    direction: Direction,
    started_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    outcome: OutcomeCell,
}

struct Registry {
    entries: HashMap<StepIdentity, Entry>,
}

/// Timer registry shared between the session machine and the tick thread.
///
/// Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct TimerService {
    registry: Arc<Mutex<Registry>>,
    callbacks: Arc<TimerCallbacks>,
    /// When false the caller drives `tick` directly (tests, embedding)
    auto_spawn: bool,
    loop_running: Arc<AtomicBool>,
}

impl TimerService {
    pub fn new(callbacks: TimerCallbacks) -> Self {
        Self::build(callbacks, true)
    }

    /// A service without the background thread; the caller calls `tick`.
    pub fn new_manual(callbacks: TimerCallbacks) -> Self {
        Self::build(callbacks, false)
    }

    fn build(callbacks: TimerCallbacks, auto_spawn: bool) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                entries: HashMap::new(),
            })),
            callbacks: Arc::new(callbacks),
            auto_spawn,
            loop_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a count-down timer of `total_ms` for the given step.
    pub fn start_countdown(
        &self,
        identity: StepIdentity,
        total_ms: i64,
        outcome: OutcomeCell,
        now: DateTime<Utc>,
    ) {
        outcome.update(|o| {
            o.start_timer_ms = Some(total_ms);
            o.end_timer_ms = Some(total_ms);
        });
        self.register(
            identity,
            Entry {
                direction: Direction::CountDown { total_ms },
                started_at: now,
                paused_at: None,
                outcome,
            },
        );
    }

    /// Register a count-up timer, ended automatically at `auto_stop_ms` if set.
    pub fn start_countup(
        &self,
        identity: StepIdentity,
        auto_stop_ms: Option<i64>,
        outcome: OutcomeCell,
        now: DateTime<Utc>,
    ) {
        outcome.update(|o| {
            o.start_timer_ms = auto_stop_ms;
            o.end_timer_ms = Some(0);
        });
        self.register(
            identity,
            Entry {
                direction: Direction::CountUp { auto_stop_ms },
                started_at: now,
                paused_at: None,
                outcome,
            },
        );
    }

    fn register(&self, identity: StepIdentity, entry: Entry) {
        {
            let mut registry = self.lock();
            debug!(step = %identity.set_id, "timer registered");
            registry.entries.insert(identity.clone(), entry);
        }
        (self.callbacks.on_timer_enabled)(&identity);
        if self.auto_spawn {
            self.ensure_loop();
        }
    }

    /// Freeze a timer in place. A paused timer is skipped by `tick`.
    pub fn pause(&self, identity: &StepIdentity, now: DateTime<Utc>) {
        let mut registry = self.lock();
        if let Some(entry) = registry.entries.get_mut(identity) {
            if entry.paused_at.is_none() {
                entry.paused_at = Some(now);
            }
        }
    }

    /// Resume a paused timer. The start instant is shifted forward by the
    /// paused duration so elapsed time excludes the pause.
    pub fn resume(&self, identity: &StepIdentity, now: DateTime<Utc>) {
        let mut registry = self.lock();
        if let Some(entry) = registry.entries.get_mut(identity) {
            if let Some(paused_at) = entry.paused_at.take() {
                entry.started_at += now - paused_at;
            }
        }
    }

    /// Remove a timer without firing its end callback.
    pub fn cancel(&self, identity: &StepIdentity) {
        let removed = {
            let mut registry = self.lock();
            registry.entries.remove(identity).is_some()
        };
        if removed {
            debug!(step = %identity.set_id, "timer cancelled");
            (self.callbacks.on_timer_disabled)(identity);
        }
    }

    pub fn is_active(&self, identity: &StepIdentity) -> bool {
        self.lock().entries.contains_key(identity)
    }

    pub fn active_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// Advance every live timer to `now`.
    ///
    /// Writes the outcome cell only when the visible value changed, fires
    /// `on_timer_end` exactly once per ended timer, and removes ended
    /// entries. Returns the identities that ended on this tick.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<StepIdentity> {
        let mut ended = Vec::new();
        {
            let mut registry = self.lock();
            for (identity, entry) in &mut registry.entries {
                if entry.paused_at.is_some() {
                    continue;
                }
                let elapsed_ms = (now - entry.started_at).num_milliseconds().max(0);
                match entry.direction {
                    Direction::CountDown { total_ms } => {
                        let remaining = (total_ms - elapsed_ms).max(0);
                        if entry.outcome.get().end_timer_ms != Some(remaining) {
                            entry.outcome.update(|o| o.end_timer_ms = Some(remaining));
                        }
                        if remaining == 0 {
                            ended.push(identity.clone());
                        }
                    }
                    Direction::CountUp { auto_stop_ms } => {
                        if entry.outcome.get().end_timer_ms != Some(elapsed_ms) {
                            entry.outcome.update(|o| o.end_timer_ms = Some(elapsed_ms));
                        }
                        if let Some(target) = auto_stop_ms {
                            if elapsed_ms >= target {
                                ended.push(identity.clone());
                            }
                        }
                    }
                }
            }
            for identity in &ended {
                registry.entries.remove(identity);
            }
        }
        for identity in &ended {
            debug!(step = %identity.set_id, "timer ended");
            (self.callbacks.on_timer_end)(identity);
        }
        ended
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the tick thread if it is not already running.
    fn ensure_loop(&self) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let service = self.clone();
        thread::spawn(move || loop {
            sleep_to_next_second();
            service.tick(Utc::now());
            if service.active_count() == 0 {
                service.loop_running.store(false, Ordering::SeqCst);
                // a registration racing this shutdown saw the flag still set
                // and skipped its spawn; it is this thread's to restart
                if service.active_count() > 0 && !service.loop_running.swap(true, Ordering::SeqCst)
                {
                    continue;
                }
                break;
            }
        });
    }
}

/// Sleep until just past the next wall-clock second boundary, so displayed
/// values change in step with a clock rather than at an arbitrary phase.
fn sleep_to_next_second() {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let subsec = u64::from(since_epoch.subsec_millis());
    thread::sleep(Duration::from_millis(1000 - subsec.min(999)));
}
