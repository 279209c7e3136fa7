//! The session state machine.
//!
//! Navigation happens on the flattened step list; edits happen on the
//! hierarchical container list. The machine bridges the two with a
//! recomputable flat-index/position mapping. All operations are pure
//! snapshot-to-snapshot transforms: the machine itself is never mutated,
//! though step outcome cells remain independently mutable by design.

use crate::sequence::{
    flat_paths, flatten, normalize, recompute_rest_next, reindex, ChildItem, Container,
    SequenceItem,
};
use crate::step::SessionStep;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Number of bootstrap steps (`Preparing`, `Warmup`) ahead of the sequence
const BOOTSTRAP_STEPS: usize = 2;

/// Position of a step in the hierarchical form.
///
/// For superset containers `child_item` is the step index and `within_item`
/// is 0; a rest-between-exercises maps to `{0, 0}` within its item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPosition {
    pub container: usize,
    pub child_item: usize,
    pub within_item: usize,
}

/// One session's step sequence plus the current navigation index
#[derive(Clone, Debug)]
pub struct SessionMachine {
    sequence: Vec<SequenceItem>,
    index: usize,
    started_at: DateTime<Utc>,
}

impl SessionMachine {
    /// Build a machine over a freshly constructed sequence, enforcing the
    /// rest invariants and assigning order indices
    pub fn new(sequence: Vec<SequenceItem>, started_at: DateTime<Utc>) -> Self {
        let mut sequence = normalize(sequence);
        reindex(&mut sequence);
        recompute_rest_next(&mut sequence);
        Self {
            sequence,
            index: 0,
            started_at,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn sequence(&self) -> &[SequenceItem] {
        &self.sequence
    }

    /// The flattened, navigable step list: bootstrap steps, the expanded
    /// sequence, then the terminal `Finished` step
    pub fn all_states(&self) -> Vec<SessionStep> {
        let mut flat = Vec::with_capacity(self.sequence.len() + BOOTSTRAP_STEPS + 1);
        flat.push(SessionStep::Preparing);
        flat.push(SessionStep::Warmup);
        flat.extend(flatten(&self.sequence));
        flat.push(SessionStep::Finished {
            started_at: self.started_at,
        });
        flat
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_state(&self) -> Option<SessionStep> {
        self.all_states().into_iter().nth(self.index)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.current_state(), Some(SessionStep::Finished { .. }) | None)
    }

    /// Advance to the next step; terminal at the `Finished` step
    pub fn next(&self) -> Self {
        let last = self.all_states().len().saturating_sub(1);
        Self {
            index: (self.index + 1).min(last),
            ..self.clone()
        }
    }

    /// Reposition without altering the sequence
    pub fn with_current_index(&self, index: usize) -> Self {
        let last = self.all_states().len().saturating_sub(1);
        Self {
            index: index.min(last),
            ..self.clone()
        }
    }

    /// Replace the sequence wholesale at an explicit index
    pub fn with_sequence(&self, sequence: Vec<SequenceItem>, index: usize) -> Self {
        let mut machine = Self::new(sequence, self.started_at);
        let last = machine.all_states().len().saturating_sub(1);
        machine.index = index.min(last);
        machine
    }

    /// Apply a structural transform to the container list; the current index
    /// is reinterpreted against the new sequence
    pub fn edit_sequence<F>(&self, transform: F) -> Self
    where
        F: FnOnce(Vec<SequenceItem>) -> Vec<SequenceItem>,
    {
        self.with_sequence(transform(self.sequence.clone()), self.index)
    }

    /// Map a flat index to its hierarchical position. Bootstrap and
    /// `Finished` steps have no position.
    pub fn container_and_child_index(&self, flat_index: usize) -> Option<StepPosition> {
        let core = flat_index.checked_sub(BOOTSTRAP_STEPS)?;
        let paths = flat_paths(&self.sequence);
        paths.get(core).map(|p| StepPosition {
            container: p.seq,
            child_item: p.child,
            within_item: p.within,
        })
    }

    /// Map a hierarchical position back to its flat index
    pub fn flat_index_in_container(&self, position: &StepPosition) -> Option<usize> {
        flat_paths(&self.sequence)
            .iter()
            .position(|p| {
                p.seq == position.container
                    && p.child == position.child_item
                    && p.within == position.within_item
            })
            .map(|core| core + BOOTSTRAP_STEPS)
    }

    /// Apply `transform` to exactly the addressed child item of an exercise
    /// container. The transform may replace the item with several (splice);
    /// everything else is left untouched.
    pub fn update_exercise_child_item<F>(&self, position: &StepPosition, transform: F) -> Result<Self>
    where
        F: FnOnce(ChildItem) -> Vec<ChildItem>,
    {
        let mut sequence = self.sequence.clone();

        let Some(SequenceItem::Container(Container::Exercise { items, .. })) =
            sequence.get_mut(position.container)
        else {
            return Err(Error::Session(format!(
                "no exercise container at {}",
                position.container
            )));
        };
        if position.child_item >= items.len() {
            return Err(Error::Session(format!(
                "no child item {} in container {}",
                position.child_item, position.container
            )));
        }

        let replaced = items.remove(position.child_item);
        let replacement = transform(replaced);
        for (offset, item) in replacement.into_iter().enumerate() {
            items.insert(position.child_item + offset, item);
        }

        Ok(self.with_sequence(sequence, self.index))
    }

    /// Apply `transform` to exactly the addressed superset's child states
    pub fn update_superset_child_states<F>(&self, container: usize, transform: F) -> Result<Self>
    where
        F: FnOnce(Vec<SessionStep>) -> Vec<SessionStep>,
    {
        let mut sequence = self.sequence.clone();

        let Some(SequenceItem::Container(Container::Superset { steps })) =
            sequence.get_mut(container)
        else {
            return Err(Error::Session(format!(
                "no superset container at {}",
                container
            )));
        };

        let taken = std::mem::take(steps);
        *steps = transform(taken);

        Ok(self.with_sequence(sequence, self.index))
    }
}
