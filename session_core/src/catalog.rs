//! Default catalog of exercises and equipment.
//!
//! Gives the CLI and tests a realistic built-in gym; real deployments load
//! their own definitions and only reuse the equipment ladders.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog_internal);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog with built-in exercises and equipment
///
/// **Note**: For production use, prefer `get_default_catalog()` which returns
/// a cached reference. This function is retained for testing and custom
/// catalog creation.
pub fn build_default_catalog() -> Catalog {
    build_default_catalog_internal()
}

fn build_default_catalog_internal() -> Catalog {
    let mut exercises = HashMap::new();
    let mut equipment = HashMap::new();

    // ========================================================================
    // Equipment
    // ========================================================================

    equipment.insert(
        "barbell".into(),
        Equipment {
            id: "barbell".into(),
            name: "Olympic Barbell".into(),
            available_loads: (0..73).map(|i| 20.0 + 2.5 * f64::from(i)).collect(),
            plate_based: true,
            bar_weight: 20.0,
            plate_pairs: vec![25.0, 20.0, 15.0, 10.0, 5.0, 2.5, 1.25],
        },
    );

    equipment.insert(
        "dumbbells".into(),
        Equipment {
            id: "dumbbells".into(),
            name: "Dumbbell Rack".into(),
            available_loads: (0..20).map(|i| 4.0 + 2.0 * f64::from(i)).collect(),
            plate_based: false,
            bar_weight: 0.0,
            plate_pairs: vec![],
        },
    );

    equipment.insert(
        "cable_stack".into(),
        Equipment {
            id: "cable_stack".into(),
            name: "Cable Stack".into(),
            available_loads: (1..21).map(|i| 5.0 * f64::from(i)).collect(),
            plate_based: false,
            bar_weight: 0.0,
            plate_pairs: vec![],
        },
    );

    // ========================================================================
    // Exercises
    // ========================================================================

    exercises.insert(
        "squat".into(),
        ExerciseDefinition {
            id: "squat".into(),
            name: "Back Squat".into(),
            equipment_id: Some("barbell".into()),
            nominal_load: 60.0,
            set_count: 3,
            reps_range: RepsRange::new(5, 8),
            rest_ms: 180_000,
            kind: SetKind::Reps,
            unilateral: false,
            generate_warmups: true,
            needs_calibration: false,
            hr_bounds: None,
            stores_history: true,
        },
    );

    exercises.insert(
        "bench_press".into(),
        ExerciseDefinition {
            id: "bench_press".into(),
            name: "Bench Press".into(),
            equipment_id: Some("barbell".into()),
            nominal_load: 40.0,
            set_count: 3,
            reps_range: RepsRange::new(6, 10),
            rest_ms: 150_000,
            kind: SetKind::Reps,
            unilateral: false,
            generate_warmups: true,
            needs_calibration: false,
            hr_bounds: None,
            stores_history: true,
        },
    );

    exercises.insert(
        "db_split_squat".into(),
        ExerciseDefinition {
            id: "db_split_squat".into(),
            name: "Dumbbell Split Squat".into(),
            equipment_id: Some("dumbbells".into()),
            nominal_load: 12.0,
            set_count: 3,
            reps_range: RepsRange::new(8, 12),
            rest_ms: 90_000,
            kind: SetKind::Reps,
            unilateral: true,
            generate_warmups: false,
            needs_calibration: false,
            hr_bounds: None,
            stores_history: true,
        },
    );

    exercises.insert(
        "cable_row".into(),
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
        },
    );

    exercises.insert(
        "plank".into(),
        ExerciseDefinition {
            id: "plank".into(),
            name: "Plank".into(),
            equipment_id: None,
            nominal_load: 0.0,
            set_count: 3,
            reps_range: RepsRange::new(1, 1),
            rest_ms: 60_000,
            kind: SetKind::TimedDuration { duration_ms: 60_000 },
            unilateral: false,
            generate_warmups: false,
            needs_calibration: false,
            hr_bounds: None,
            stores_history: false,
        },
    );

    Catalog {
        exercises,
        equipment,
    }
}

impl Catalog {
    /// Validate internal consistency, returning all problems found
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, exercise) in &self.exercises {
            if id != &exercise.id {
                errors.push(format!("exercise key {} != id {}", id, exercise.id));
            }
            if exercise.set_count == 0 {
                errors.push(format!("exercise {} has zero sets", id));
            }
            if exercise.reps_range.min > exercise.reps_range.max {
                errors.push(format!("exercise {} has inverted reps range", id));
            }
            if let Some(equipment_id) = &exercise.equipment_id {
                if !self.equipment.contains_key(equipment_id) {
                    errors.push(format!(
                        "exercise {} references unknown equipment {}",
                        id, equipment_id
                    ));
                }
            }
        }

        for (id, eq) in &self.equipment {
            if id != &eq.id {
                errors.push(format!("equipment key {} != id {}", id, eq.id));
            }
            let sorted = eq
                .available_loads
                .windows(2)
                .all(|w| w[0] <= w[1]);
            if !sorted {
                errors.push(format!("equipment {} load ladder is not sorted", id));
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = build_default_catalog();
        let errors = catalog.validate();
        assert!(errors.is_empty(), "validation errors: {:?}", errors);
    }

    #[test]
    fn test_catalog_has_core_exercises() {
        let catalog = get_default_catalog();
        assert!(catalog.exercises.contains_key("squat"));
        assert!(catalog.exercises.contains_key("cable_row"));
        assert!(catalog.equipment.contains_key("barbell"));
    }

    #[test]
    fn test_validation_catches_unknown_equipment() {
        let mut catalog = build_default_catalog();
        if let Some(ex) = catalog.exercises.get_mut("squat") {
            ex.equipment_id = Some("ghost_rack".into());
        }
        assert!(!catalog.validate().is_empty());
    }
}
