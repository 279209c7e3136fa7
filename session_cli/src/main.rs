use session_core::*;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "liftguide")]
#[command(about = "Guided strength session runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the next guided session (default)
    Run {
        /// Show the built session without performing or logging it
        #[arg(long)]
        dry_run: bool,

        /// Auto-complete (for testing) - perform every set as planned
        #[arg(long)]
        auto_complete: bool,
    },

    /// Show the planned next session per exercise
    Plan,

    /// Show rolling progression state per exercise
    State,

    /// Roll up the set-record WAL to CSV
    Rollup {
        /// Clean up processed WAL files after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

fn main() -> Result<()> {
    session_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Some(Commands::Run {
            dry_run,
            auto_complete,
        }) => cmd_run(data_dir, dry_run, auto_complete, &config),
        Some(Commands::Plan) => cmd_plan(data_dir, &config),
        Some(Commands::State) => cmd_state(data_dir),
        Some(Commands::Rollup { cleanup }) => cmd_rollup(data_dir, cleanup),
        None => cmd_run(data_dir, false, false, &config),
    }
}

fn paths(data_dir: &Path) -> (PathBuf, PathBuf, PathBuf, PathBuf) {
    let wal_dir = data_dir.join("wal");
    let wal_path = wal_dir.join("set_records.wal");
    let state_path = wal_dir.join("rolling_state.json");
    let csv_path = data_dir.join("set_records.csv");
    (wal_dir, wal_path, state_path, csv_path)
}

fn validated_catalog() -> Result<&'static Catalog> {
    let catalog = get_default_catalog();
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::CatalogValidation("Invalid catalog".into()));
    }
    Ok(catalog)
}

/// The built-in workout run when no custom definition exists
fn default_workout(catalog: &Catalog) -> WorkoutDefinition {
    let mut entries = Vec::new();
    for id in ["squat", "bench_press", "cable_row", "db_split_squat"] {
        if let Some(def) = catalog.exercises.get(id) {
            entries.push(WorkoutEntry::Exercise(def.clone()));
        }
    }
    WorkoutDefinition {
        id: "full_body".into(),
        name: "Full Body".into(),
        entries,
    }
}

fn cmd_run(data_dir: PathBuf, dry_run: bool, auto_complete: bool, config: &Config) -> Result<()> {
    let (_, wal_path, state_path, _) = paths(&data_dir);
    std::fs::create_dir_all(wal_path.parent().unwrap_or(&data_dir))?;

    let catalog = validated_catalog()?;
    let workout = default_workout(catalog);

    let mut history = JsonlHistory::new(&wal_path);
    let mut rolling = RollingStateBook::load(&state_path)?;
    let policy = config.progression.policy();
    let now = chrono::Utc::now();

    let ctx = BuildContext {
        catalog,
        history: &history,
        rolling: &rolling,
        policy: &policy,
        session: &config.session,
        warmup_planner: &PercentWarmupPlanner,
        plate_calculator: &BarPlateCalculator,
        body_weight: None,
        now,
    };
    let mut machine = build_session(&workout, &ctx)?;

    if dry_run {
        display_session(&machine, catalog);
        println!("\n[Dry run - not performing session]");
        return Ok(());
    }

    let workout_history_id = uuid::Uuid::new_v4();

    while !machine.is_completed() {
        let Some(step) = machine.current_state() else {
            break;
        };
        display_step(&step);

        match &step {
            SessionStep::CalibrationLoadSelection(sel) => {
                let def = catalog
                    .exercises
                    .get(&sel.exercise_id)
                    .cloned()
                    .ok_or_else(|| Error::Session(format!("unknown exercise {}", sel.exercise_id)))?;
                let equipment = def
                    .equipment_id
                    .as_deref()
                    .and_then(|id| catalog.equipment.get(id));
                let chosen = if auto_complete {
                    def.nominal_load
                } else {
                    prompt_load(sel.spec.load)?
                };
                machine = confirm_calibration_load(
                    &machine,
                    &def,
                    equipment,
                    chosen,
                    &PercentWarmupPlanner,
                    &BarPlateCalculator,
                    &config.session,
                )?;
                // the consumed selection leaves the index on the spliced steps
                continue;
            }
            SessionStep::CalibrationRirSelection(p) | SessionStep::AutoRegulationRirSelection(p) => {
                let mode = if matches!(step, SessionStep::CalibrationRirSelection(_)) {
                    RirMode::Calibration
                } else {
                    RirMode::AutoRegulation
                };
                let def = catalog
                    .exercises
                    .get(&p.exercise_id)
                    .cloned()
                    .ok_or_else(|| Error::Session(format!("unknown exercise {}", p.exercise_id)))?;
                let equipment = def
                    .equipment_id
                    .as_deref()
                    .and_then(|id| catalog.equipment.get(id));
                let rating = if auto_complete {
                    RirRating {
                        rir: 2,
                        form_broke: false,
                    }
                } else {
                    prompt_rir()?
                };
                machine = apply_rir(
                    &machine,
                    rating,
                    mode,
                    &def,
                    equipment,
                    &RirLoadAdjuster,
                    &BarPlateCalculator,
                    &config.session,
                )?;
                // the prompt removal moves the sequence under the index
                continue;
            }
            SessionStep::Set(set) if set.is_work() || set.is_calibration => {
                if !auto_complete {
                    wait_for_enter("Press Enter when the set is done")?;
                }
                set.outcome.update(|o| {
                    o.load = Some(set.spec.load);
                    o.reps = Some(set.spec.reps);
                    o.completed_at = Some(chrono::Utc::now());
                });
                let stores = catalog
                    .exercises
                    .get(&set.exercise_id)
                    .map_or(true, |d| d.stores_history);
                if stores {
                    history.append(&SetRecord {
                        id: uuid::Uuid::new_v4(),
                        workout_history_id,
                        set_id: set.spec.set_id,
                        exercise_id: set.exercise_id.clone(),
                        order: set.order,
                        load: set.spec.load,
                        reps: set.spec.reps,
                        rir: None,
                        performed_at: chrono::Utc::now(),
                    })?;
                }
            }
            SessionStep::Rest(rest) => {
                if !auto_complete {
                    wait_for_enter(&format!(
                        "Rest {}s - press Enter to continue",
                        rest.spec.duration_ms / 1000
                    ))?;
                }
            }
            _ => {
                if !auto_complete {
                    wait_for_enter("Press Enter to continue")?;
                }
            }
        }

        machine = machine.next();
    }

    // Settle progression counters per performed exercise
    let flat = machine.all_states();
    for def in workout.exercises() {
        let achieved: Vec<PlannedSet> = flat
            .iter()
            .filter_map(|s| s.as_set())
            .filter(|s| s.exercise_id == def.id && s.is_work() && s.side_rest_counter == 0)
            .filter(|s| s.outcome.get().is_completed())
            .map(|s| PlannedSet {
                load: s.spec.load,
                reps: s.spec.reps,
            })
            .collect();
        let target: Vec<PlannedSet> = flat
            .iter()
            .filter_map(|s| s.as_set())
            .filter(|s| s.exercise_id == def.id && s.is_work() && s.side_rest_counter == 0)
            .map(|s| PlannedSet {
                load: s.spec.load,
                reps: s.spec.reps,
            })
            .collect();
        if target.is_empty() {
            continue;
        }
        let state = rolling.entry(&def.id);
        record_session_result(state, &achieved, &target, false, now);
    }
    rolling.save(&state_path)?;

    println!("\n✓ Session complete!");
    Ok(())
}

fn cmd_plan(data_dir: PathBuf, config: &Config) -> Result<()> {
    let (_, wal_path, state_path, _) = paths(&data_dir);

    let catalog = validated_catalog()?;
    let history = JsonlHistory::new(&wal_path);
    let rolling = RollingStateBook::load(&state_path)?;
    let policy = config.progression.policy();
    let now = chrono::Utc::now();

    for def in default_workout(catalog).exercises() {
        let previous = last_session_sets(&history, &def.id)?;
        let available = def
            .equipment_id
            .as_deref()
            .and_then(|id| catalog.equipment.get(id))
            .map(|eq| eq.available_loads.clone())
            .unwrap_or_default();
        let state = rolling.get(&def.id);

        println!("\n{} ({})", def.name, def.id);
        if def.needs_calibration && previous.is_none() {
            println!("  needs calibration - load will be asked in session");
            continue;
        }
        match plan_session(
            def,
            &state,
            previous.as_ref().map(|(sets, _)| sets.as_slice()),
            &available,
            &policy,
            now,
        ) {
            Some(planned) => {
                println!("  verdict: {:?}", planned.verdict);
                for (i, set) in planned.plan.sets.iter().enumerate() {
                    println!("  set {}: {:.1} x {}", i + 1, set.load, set.reps);
                }
            }
            None => println!("  no progression entry - nominal {:.1}", def.nominal_load),
        }
    }

    Ok(())
}

fn cmd_state(data_dir: PathBuf) -> Result<()> {
    let (_, _, state_path, _) = paths(&data_dir);
    let rolling = RollingStateBook::load(&state_path)?;

    if rolling.exercises.is_empty() {
        println!("No rolling state recorded yet.");
        return Ok(());
    }

    let mut ids: Vec<&String> = rolling.exercises.keys().collect();
    ids.sort();
    for id in ids {
        let state = &rolling.exercises[id];
        println!("\n{}", id);
        println!(
            "  streak: {}  failed: {}  this week: {}",
            state.successful_session_counter,
            state.session_failed_counter,
            state.times_completed_in_a_week
        );
        if let Some(last) = &state.last_successful_session {
            let top = last.iter().map(|s| s.load).fold(f64::MIN, f64::max);
            println!("  last successful top load: {:.1}", top);
        }
        if state.last_session_was_deload {
            println!("  last session was a deload");
        }
    }

    Ok(())
}

fn cmd_rollup(data_dir: PathBuf, cleanup: bool) -> Result<()> {
    let (wal_dir, wal_path, _, csv_path) = paths(&data_dir);

    if !wal_path.exists() {
        println!("No WAL file found - nothing to roll up.");
        return Ok(());
    }

    let count = session_core::rollup::wal_to_csv_and_archive(&wal_path, &csv_path)?;

    println!("✓ Rolled up {} set records to CSV", count);
    println!("  CSV: {}", csv_path.display());

    if cleanup {
        let cleaned = session_core::rollup::cleanup_processed_wals(&wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed WAL files", cleaned);
        }
    }

    Ok(())
}

fn display_session(machine: &SessionMachine, catalog: &Catalog) {
    println!("\n╭─────────────────────────────────────────╮");
    println!("│  SESSION PLAN");
    println!("╰─────────────────────────────────────────╯");
    for step in machine.all_states() {
        match &step {
            SessionStep::Set(s) => {
                let name = catalog
                    .exercises
                    .get(&s.exercise_id)
                    .map(|d| d.name.as_str())
                    .unwrap_or(s.exercise_id.as_str());
                let kind = if s.is_warmup {
                    "warm-up"
                } else if s.is_calibration {
                    "calibration"
                } else {
                    "work"
                };
                println!("  {} - {} {:.1} x {}", name, kind, s.spec.load, s.spec.reps);
            }
            SessionStep::Rest(r) => {
                println!("  rest {}s", r.spec.duration_ms / 1000);
            }
            SessionStep::CalibrationLoadSelection(c) => {
                println!("  {} - pick a working load", c.exercise_id);
            }
            _ => {}
        }
    }
}

fn display_step(step: &SessionStep) {
    match step {
        SessionStep::Preparing => println!("\n── Get your equipment ready ──"),
        SessionStep::Warmup => println!("\n── General warm-up ──"),
        SessionStep::Set(s) => {
            let kind = if s.is_warmup {
                "Warm-up"
            } else if s.is_calibration {
                "Calibration set"
            } else {
                "Set"
            };
            println!("\n{}: {} {:.1} x {}", kind, s.exercise_id, s.spec.load, s.spec.reps);
            if let Some(change) = &s.plate_change {
                if !change.add_per_side.is_empty() {
                    println!("  add per side: {:?}", change.add_per_side);
                }
                if !change.remove_per_side.is_empty() {
                    println!("  remove per side: {:?}", change.remove_per_side);
                }
            }
        }
        SessionStep::Rest(r) => {
            println!("\nRest: {}s", r.spec.duration_ms / 1000);
        }
        SessionStep::CalibrationLoadSelection(c) => {
            println!("\nPick a working load for {}", c.exercise_id);
        }
        SessionStep::CalibrationRirSelection(p) | SessionStep::AutoRegulationRirSelection(p) => {
            println!("\nHow many reps were left in reserve for {}?", p.exercise_id);
        }
        SessionStep::Finished { .. } => println!("\n── Session finished ──"),
    }
}

fn wait_for_enter(message: &str) -> Result<()> {
    println!("{}", message);
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(())
}

fn prompt_load(suggested: f64) -> Result<f64> {
    println!("Enter a load (suggested {:.1})", suggested);
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().parse().unwrap_or(suggested))
}

fn prompt_rir() -> Result<RirRating> {
    println!("Enter reps in reserve (0-5, add 'f' if form broke down)");
    print!("> ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim().to_lowercase();
    let form_broke = trimmed.ends_with('f');
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    Ok(RirRating {
        rir: digits.parse().unwrap_or(2),
        form_broke,
    })
}
