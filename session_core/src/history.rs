//! Set-history storage.
//!
//! The session core consumes history through a narrow read/write contract;
//! the JSONL implementation appends committed records to a write-ahead file
//! with file locking, in the same shape the CSV archive is rolled up from.

use crate::{PlannedSet, Result, SetOutcome, SetRecord};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Narrow history contract consumed by planning and resumption.
///
/// Read results are ordered most-recent-first where recency matters.
pub trait HistoryStore {
    /// All records for one exercise, most recent session first
    fn set_records_by_exercise(&self, exercise_id: &str) -> Result<Vec<SetRecord>>;

    /// All records belonging to one workout history
    fn set_records_by_workout_history(&self, workout_history_id: Uuid) -> Result<Vec<SetRecord>>;

    /// All workout history ids, most recent first
    fn all_workout_histories(&self) -> Result<Vec<Uuid>>;

    /// Append one committed record
    fn append(&mut self, record: &SetRecord) -> Result<()>;
}

/// The previous session's achieved sets for an exercise, in set order,
/// together with the recorded outcome for each slot
pub fn last_session_sets(
    store: &dyn HistoryStore,
    exercise_id: &str,
) -> Result<Option<(Vec<PlannedSet>, Vec<SetOutcome>)>> {
    let records = store.set_records_by_exercise(exercise_id)?;
    let Some(last_history) = records.first().map(|r| r.workout_history_id) else {
        return Ok(None);
    };

    let mut last: Vec<&SetRecord> = records
        .iter()
        .filter(|r| r.workout_history_id == last_history)
        .collect();
    last.sort_by_key(|r| r.order);

    let sets = last
        .iter()
        .map(|r| PlannedSet::new(r.load, r.reps))
        .collect();
    let outcomes = last
        .iter()
        .map(|r| SetOutcome {
            load: Some(r.load),
            reps: Some(r.reps),
            rir: r.rir,
            start_timer_ms: None,
            end_timer_ms: None,
            completed_at: Some(r.performed_at),
        })
        .collect();

    Ok(Some((sets, outcomes)))
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-memory history, used by tests and as the live-session cache
#[derive(Clone, Debug, Default)]
pub struct InMemoryHistory {
    records: Vec<SetRecord>,
}

impl InMemoryHistory {
    pub fn new(records: Vec<SetRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[SetRecord] {
        &self.records
    }
}

impl HistoryStore for InMemoryHistory {
    fn set_records_by_exercise(&self, exercise_id: &str) -> Result<Vec<SetRecord>> {
        let mut records: Vec<SetRecord> = self
            .records
            .iter()
            .filter(|r| r.exercise_id == exercise_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
        Ok(records)
    }

    fn set_records_by_workout_history(&self, workout_history_id: Uuid) -> Result<Vec<SetRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.workout_history_id == workout_history_id)
            .cloned()
            .collect())
    }

    fn all_workout_histories(&self) -> Result<Vec<Uuid>> {
        let mut seen = Vec::new();
        let mut by_recency: Vec<&SetRecord> = self.records.iter().collect();
        by_recency.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
        for record in by_recency {
            if !seen.contains(&record.workout_history_id) {
                seen.push(record.workout_history_id);
            }
        }
        Ok(seen)
    }

    fn append(&mut self, record: &SetRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// JSONL Store
// ============================================================================

/// JSONL-backed history with file locking.
///
/// Records are appended one JSON object per line; reads take a shared lock
/// and skip unparsable lines with a warning rather than failing the load.
#[derive(Clone, Debug)]
pub struct JsonlHistory {
    path: PathBuf,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<SetRecord>> {
        read_records(&self.path)
    }
}

/// Read all records from a JSONL history file
pub fn read_records(path: &Path) -> Result<Vec<SetRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<SetRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Failed to parse record at line {}: {}", line_num + 1, e);
                // Continue reading, don't fail completely
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} records from {:?}", records.len(), path);
    Ok(records)
}

impl HistoryStore for JsonlHistory {
    fn set_records_by_exercise(&self, exercise_id: &str) -> Result<Vec<SetRecord>> {
        let mut records: Vec<SetRecord> = self
            .read_all()?
            .into_iter()
            .filter(|r| r.exercise_id == exercise_id)
            .collect();
        records.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
        Ok(records)
    }

    fn set_records_by_workout_history(&self, workout_history_id: Uuid) -> Result<Vec<SetRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.workout_history_id == workout_history_id)
            .collect())
    }

    fn all_workout_histories(&self) -> Result<Vec<Uuid>> {
        let mut records = self.read_all()?;
        records.sort_by(|a, b| b.performed_at.cmp(&a.performed_at));
        let mut seen = Vec::new();
        for record in records {
            if !seen.contains(&record.workout_history_id) {
                seen.push(record.workout_history_id);
            }
        }
        Ok(seen)
    }

    fn append(&mut self, record: &SetRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!("Appended set record {} to history", record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    pub(crate) fn make_record(
        exercise_id: &str,
        workout_history_id: Uuid,
        order: u32,
        load: f64,
        reps: u32,
        age_days: i64,
    ) -> SetRecord {
        SetRecord {
            id: Uuid::new_v4(),
            workout_history_id,
            set_id: Uuid::new_v4(),
            exercise_id: exercise_id.into(),
            order,
            load,
            reps,
            rir: None,
            performed_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history.wal");

        let mut store = JsonlHistory::new(&path);
        let history_id = Uuid::new_v4();
        for order in 0..3 {
            store
                .append(&make_record("squat", history_id, order, 100.0, 5, 0))
                .unwrap();
        }

        let records = store.set_records_by_exercise("squat").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(store.set_records_by_exercise("bench_press").unwrap().len(), 0);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonlHistory::new(temp_dir.path().join("missing.wal"));
        assert!(store.all_workout_histories().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("history.wal");

        let mut store = JsonlHistory::new(&path);
        store
            .append(&make_record("squat", Uuid::new_v4(), 0, 100.0, 5, 0))
            .unwrap();

        use std::io::Write as _;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{ not json").unwrap();

        assert_eq!(read_records(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_last_session_sets_picks_most_recent() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let store = InMemoryHistory::new(vec![
            make_record("squat", old, 0, 95.0, 5, 7),
            make_record("squat", old, 1, 95.0, 5, 7),
            make_record("squat", new, 1, 100.0, 5, 1),
            make_record("squat", new, 0, 100.0, 6, 1),
        ]);

        let (sets, outcomes) = last_session_sets(&store, "squat").unwrap().unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], PlannedSet::new(100.0, 6)); // sorted by order
        assert_eq!(sets[1], PlannedSet::new(100.0, 5));
        assert_eq!(outcomes[0].reps, Some(6));
    }

    #[test]
    fn test_last_session_sets_none_without_history() {
        let store = InMemoryHistory::default();
        assert!(last_session_sets(&store, "squat").unwrap().is_none());
    }

    #[test]
    fn test_workout_histories_ordered_by_recency() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let store = InMemoryHistory::new(vec![
            make_record("squat", old, 0, 95.0, 5, 7),
            make_record("squat", new, 0, 100.0, 5, 1),
        ]);

        assert_eq!(store.all_workout_histories().unwrap(), vec![new, old]);
    }
}
