//! Equipment collaborators: warm-up planning, plate math, RIR adjustment.
//!
//! The session core consumes these through narrow traits and treats them as
//! pure functions. The default implementations here are deliberately simple;
//! richer equipment models can be plugged in without touching the engine.

use crate::{Equipment, PlannedSet, PlateChange, RirRating};

/// Produces a warm-up ladder leading up to a working load
pub trait WarmupPlanner {
    fn warmup_ladder(&self, working_load: f64, working_reps: u32, equipment: &Equipment)
        -> Vec<PlannedSet>;
}

/// Computes the plate change needed to move between two loads
pub trait PlateCalculator {
    fn plate_change(&self, from: f64, to: f64, equipment: &Equipment) -> Option<PlateChange>;
}

/// Turns a reported RIR rating into an adjusted working load
pub trait CalibrationHelper {
    fn adjusted_load(&self, reported_load: f64, rating: &RirRating) -> f64;
}

// ============================================================================
// Default Implementations
// ============================================================================

/// Warm-up ladder at fixed percentages of the working load.
///
/// Each rung is snapped to the equipment's load ladder; rungs that snap onto
/// the working load (or onto the previous rung) are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct PercentWarmupPlanner;

impl PercentWarmupPlanner {
    const RUNGS: [(f64, u32); 3] = [(0.4, 8), (0.6, 5), (0.8, 3)];
}

impl WarmupPlanner for PercentWarmupPlanner {
    fn warmup_ladder(
        &self,
        working_load: f64,
        _working_reps: u32,
        equipment: &Equipment,
    ) -> Vec<PlannedSet> {
        let mut ladder: Vec<PlannedSet> = Vec::new();
        for (pct, reps) in Self::RUNGS {
            let Some(load) = equipment.nearest_load(working_load * pct) else {
                continue;
            };
            if load >= working_load {
                continue;
            }
            if ladder.last().map(|s| s.load) == Some(load) {
                continue;
            }
            ladder.push(PlannedSet::new(load, reps));
        }
        ladder
    }
}

/// Greedy per-side plate solver for barbell-style equipment
#[derive(Clone, Copy, Debug, Default)]
pub struct BarPlateCalculator;

impl BarPlateCalculator {
    /// Decompose a per-side weight into available plate denominations,
    /// heaviest first. Remainders below the smallest plate are dropped.
    fn per_side_plates(per_side: f64, denominations: &[f64]) -> Vec<f64> {
        let mut plates = Vec::new();
        let mut remaining = per_side;
        for &denom in denominations {
            while remaining + 1e-9 >= denom {
                plates.push(denom);
                remaining -= denom;
            }
        }
        plates
    }
}

impl PlateCalculator for BarPlateCalculator {
    fn plate_change(&self, from: f64, to: f64, equipment: &Equipment) -> Option<PlateChange> {
        if !equipment.plate_based {
            return None;
        }

        let from_side = ((from - equipment.bar_weight).max(0.0)) / 2.0;
        let to_side = ((to - equipment.bar_weight).max(0.0)) / 2.0;

        let mut current = Self::per_side_plates(from_side, &equipment.plate_pairs);
        let target = Self::per_side_plates(to_side, &equipment.plate_pairs);

        let mut add = Vec::new();
        for plate in &target {
            if let Some(pos) = current.iter().position(|p| (p - plate).abs() < 1e-9) {
                current.remove(pos);
            } else {
                add.push(*plate);
            }
        }

        Some(PlateChange {
            add_per_side: add,
            remove_per_side: current,
        })
    }
}

/// RIR-percentage load adjuster.
///
/// Higher reps-in-reserve means the reported load was too easy, so the
/// adjustment grows with the rating. A form break reverses the adjustment:
/// the load comes down regardless of the reported effort.
#[derive(Clone, Copy, Debug, Default)]
pub struct RirLoadAdjuster;

impl RirLoadAdjuster {
    fn adjustment_pct(rating: &RirRating) -> f64 {
        if rating.form_broke {
            return -0.025;
        }
        match rating.rir {
            0 => 0.0,
            1 => 0.025,
            2 => 0.05,
            3 => 0.075,
            _ => 0.10,
        }
    }
}

impl CalibrationHelper for RirLoadAdjuster {
    fn adjusted_load(&self, reported_load: f64, rating: &RirRating) -> f64 {
        reported_load * (1.0 + Self::adjustment_pct(rating))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::small_gym_equipment;

    #[test]
    fn test_warmup_ladder_ascends_below_working_load() {
        let ladder = PercentWarmupPlanner.warmup_ladder(100.0, 5, &small_gym_equipment());
        assert!(!ladder.is_empty());
        for pair in ladder.windows(2) {
            assert!(pair[0].load < pair[1].load);
        }
        assert!(ladder.iter().all(|s| s.load < 100.0));
    }

    #[test]
    fn test_warmup_ladder_collapses_for_light_loads() {
        // 40/60/80% of 25kg all snap near the bottom of the ladder
        let ladder = PercentWarmupPlanner.warmup_ladder(25.0, 5, &small_gym_equipment());
        for pair in ladder.windows(2) {
            assert!(pair[0].load < pair[1].load);
        }
    }

    #[test]
    fn test_plate_change_add_only() {
        let change = BarPlateCalculator
            .plate_change(60.0, 100.0, &small_gym_equipment())
            .unwrap();
        // 20/side -> 40/side: add a 20
        assert_eq!(change.add_per_side, vec![20.0]);
        assert!(change.remove_per_side.is_empty());
    }

    #[test]
    fn test_plate_change_swap() {
        let change = BarPlateCalculator
            .plate_change(100.0, 90.0, &small_gym_equipment())
            .unwrap();
        // 40/side (20+20) -> 35/side (20+15): swap a 20 for a 15
        assert_eq!(change.add_per_side, vec![15.0]);
        assert_eq!(change.remove_per_side, vec![20.0]);
    }

    #[test]
    fn test_plate_change_none_for_non_plate_equipment() {
        let mut eq = small_gym_equipment();
        eq.plate_based = false;
        assert!(BarPlateCalculator.plate_change(60.0, 80.0, &eq).is_none());
    }

    #[test]
    fn test_rir_adjustment_grows_with_rating() {
        let adj = RirLoadAdjuster;
        let base = 80.0;
        let at = |rir| {
            adj.adjusted_load(
                base,
                &RirRating {
                    rir,
                    form_broke: false,
                },
            )
        };
        assert_eq!(at(0), 80.0);
        assert!(at(1) < at(2));
        assert!(at(2) < at(4));
        assert!(at(2) > base);
    }

    #[test]
    fn test_form_break_reverses_adjustment() {
        let adjusted = RirLoadAdjuster.adjusted_load(
            80.0,
            &RirRating {
                rir: 3,
                form_broke: true,
            },
        );
        assert!(adjusted < 80.0);
    }
}
