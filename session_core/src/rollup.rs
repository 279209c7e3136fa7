//! CSV rollup for archiving history records.
//!
//! Committed set records accumulate in a JSONL write-ahead file; this module
//! converts them to the long-term CSV archive atomically so no record is
//! lost if the process dies mid-rollup.

use crate::{Result, SetRecord};
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    workout_history_id: String,
    set_id: String,
    exercise_id: String,
    order: u32,
    load: f64,
    reps: u32,
    rir: Option<u8>,
    form_broke: Option<bool>,
    performed_at: String,
}

impl From<&SetRecord> for CsvRow {
    fn from(record: &SetRecord) -> Self {
        CsvRow {
            id: record.id.to_string(),
            workout_history_id: record.workout_history_id.to_string(),
            set_id: record.set_id.to_string(),
            exercise_id: record.exercise_id.clone(),
            order: record.order,
            load: record.load,
            reps: record.reps,
            rir: record.rir.map(|r| r.rir),
            form_broke: record.rir.map(|r| r.form_broke),
            performed_at: record.performed_at.to_rfc3339(),
        }
    }
}

/// Roll up the history WAL into CSV and archive the WAL atomically.
///
/// The CSV is fsynced before the WAL is renamed to `.processed`, so a crash
/// can duplicate records in the archive but never lose them. Returns the
/// number of records processed.
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let records = crate::history::read_records(wal_path)?;

    if records.is_empty() {
        tracing::info!("No records in history WAL to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} records to CSV archive", records.len());

    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;

    tracing::info!("Archived history WAL to {:?}", processed_path);

    Ok(records.len())
}

/// Remove all `.wal.processed` files in the given directory
pub fn cleanup_processed_wals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let is_processed = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".wal.processed"))
            .unwrap_or(false);

        if is_processed {
            std::fs::remove_file(&path)?;
            count += 1;
        }
    }

    tracing::info!("Cleaned up {} processed WAL files", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, JsonlHistory};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_record() -> SetRecord {
        SetRecord {
            id: Uuid::new_v4(),
            workout_history_id: Uuid::new_v4(),
            set_id: Uuid::new_v4(),
            exercise_id: "squat".into(),
            order: 0,
            load: 100.0,
            reps: 5,
            rir: None,
            performed_at: Utc::now(),
        }
    }

    #[test]
    fn test_rollup_archives_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("history.wal");
        let csv_path = temp_dir.path().join("history.csv");

        let mut store = JsonlHistory::new(&wal_path);
        for _ in 0..3 {
            store.append(&sample_record()).unwrap();
        }

        let count = wal_to_csv_and_archive(&wal_path, &csv_path).unwrap();
        assert_eq!(count, 3);
        assert!(!wal_path.exists());
        assert!(temp_dir.path().join("history.wal.processed").exists());

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        assert!(contents.starts_with("id,"));
        assert_eq!(contents.lines().count(), 4); // header + 3 rows
    }

    #[test]
    fn test_rollup_empty_wal_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let wal_path = temp_dir.path().join("history.wal");
        let csv_path = temp_dir.path().join("history.csv");

        let count = wal_to_csv_and_archive(&wal_path, &csv_path).unwrap();
        assert_eq!(count, 0);
        assert!(!csv_path.exists());
    }

    #[test]
    fn test_cleanup_processed() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("a.wal.processed"), "x").unwrap();
        std::fs::write(temp_dir.path().join("b.wal"), "x").unwrap();

        let removed = cleanup_processed_wals(temp_dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(temp_dir.path().join("b.wal").exists());
    }
}
