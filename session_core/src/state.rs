//! Rolling-state persistence with file locking.
//!
//! The per-exercise rolling counters are saved as one JSON document with
//! proper locking; a missing or corrupted file degrades to defaults so a
//! session always remains startable.

use crate::{Error, ExerciseRollingState, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// All exercises' rolling state, keyed by exercise id
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RollingStateBook {
    pub exercises: HashMap<String, ExerciseRollingState>,
}

impl RollingStateBook {
    /// Rolling state for one exercise, defaulting for unknown exercises
    pub fn get(&self, exercise_id: &str) -> ExerciseRollingState {
        self.exercises.get(exercise_id).cloned().unwrap_or_default()
    }

    pub fn entry(&mut self, exercise_id: &str) -> &mut ExerciseRollingState {
        self.exercises.entry(exercise_id.to_string()).or_default()
    }

    /// Load the book from a file with shared locking
    ///
    /// Returns the default book if the file doesn't exist or is corrupted
    /// (with a warning); a session must remain startable either way.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No rolling-state file found, using defaults");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Unable to open state file {:?}: {}. Using defaults.", path, e);
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!("Unable to lock state file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!("Failed to read state file {:?}: {}. Using defaults.", path, e);
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<RollingStateBook>(&contents) {
            Ok(book) => {
                tracing::debug!("Loaded rolling state from {:?}", path);
                Ok(book)
            }
            Err(e) => {
                tracing::warn!("Failed to parse state file {:?}: {}. Using defaults.", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save the book atomically: write a locked temp file, sync, rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "state path missing parent")
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved rolling state to {:?}", path);
        Ok(())
    }

    /// Load, modify and save back atomically.
    ///
    /// Backfill work runs through this; per the error policy a failing
    /// modification leaves the stored book untouched.
    pub fn update<F>(path: &Path, f: F) -> Result<Self>
    where
        F: FnOnce(&mut RollingStateBook) -> Result<()>,
    {
        let mut book = Self::load(path)?;
        f(&mut book)?;
        book.save(path)?;
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlannedSet;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rolling.json");

        let mut book = RollingStateBook::default();
        book.entry("squat").session_failed_counter = 2;
        book.entry("squat").last_successful_session = Some(vec![PlannedSet::new(100.0, 5)]);

        book.save(&path).unwrap();
        let loaded = RollingStateBook::load(&path).unwrap();

        assert_eq!(loaded.get("squat").session_failed_counter, 2);
        assert_eq!(
            loaded.get("squat").last_successful_session,
            Some(vec![PlannedSet::new(100.0, 5)])
        );
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let book = RollingStateBook::load(&temp_dir.path().join("missing.json")).unwrap();
        assert!(book.exercises.is_empty());
    }

    #[test]
    fn test_corrupted_file_degrades_to_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rolling.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let book = RollingStateBook::load(&path).unwrap();
        assert!(book.exercises.is_empty());
    }

    #[test]
    fn test_update_pattern() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rolling.json");

        RollingStateBook::default().save(&path).unwrap();
        RollingStateBook::update(&path, |book| {
            book.entry("bench_press").successful_session_counter = 4;
            Ok(())
        })
        .unwrap();

        let loaded = RollingStateBook::load(&path).unwrap();
        assert_eq!(loaded.get("bench_press").successful_session_counter, 4);
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rolling.json");

        let mut book = RollingStateBook::default();
        book.entry("squat").successful_session_counter = 1;
        book.save(&path).unwrap();

        let result = RollingStateBook::update(&path, |b| {
            b.entry("squat").successful_session_counter = 99;
            Err(Error::State("backfill failed".into()))
        });
        assert!(result.is_err());

        let loaded = RollingStateBook::load(&path).unwrap();
        assert_eq!(loaded.get("squat").successful_session_counter, 1);
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("rolling.json");

        RollingStateBook::default().save(&path).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "rolling.json")
            .collect();
        assert!(extras.is_empty(), "unexpected files: {:?}", extras);
    }
}
