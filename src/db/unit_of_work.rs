//! Explicit transaction context pairing database changes with the files
//! written alongside them.
//!
//! A [`UnitOfWork`] opens a transaction with `BEGIN`. Each call to
//! [`UnitOfWork::atomic`] adds a `SAVEPOINT` level; files tracked inside a
//! level are deleted if that level fails, and handed to the enclosing level if
//! it succeeds. Dropping an uncommitted unit rolls everything back.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Database;
use crate::error::Result;

pub struct UnitOfWork<'c> {
    db: &'c Database,
    /// Files written at each level; index 0 is the outer transaction.
    levels: Vec<Vec<PathBuf>>,
    finished: bool,
}

/// Best-effort removal of files written by a failed operation.
fn remove_files(files: &[PathBuf]) {
    for path in files.iter().rev() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed file after rollback"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file during rollback"),
        }
    }
}

impl<'c> UnitOfWork<'c> {
    pub fn begin(db: &'c Database) -> Result<Self> {
        db.conn.execute_batch("BEGIN")?;
        Ok(Self {
            db,
            levels: vec![Vec::new()],
            finished: false,
        })
    }

    pub fn db(&self) -> &'c Database {
        self.db
    }

    /// Current nesting depth; 1 outside of any [`atomic`](Self::atomic) block.
    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Register a file written at the current level.
    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        if let Some(level) = self.levels.last_mut() {
            level.push(path.into());
        }
    }

    /// Point an existing entry at the file's new location after a rename.
    pub fn retrack_file(&mut self, from: &Path, to: impl Into<PathBuf>) {
        let to = to.into();
        for level in self.levels.iter_mut().rev() {
            if let Some(slot) = level.iter_mut().find(|p| p.as_path() == from) {
                *slot = to;
                return;
            }
        }
        self.track_file(to);
    }

    /// Files tracked so far across every open level.
    #[cfg(test)]
    pub(crate) fn tracked_files(&self) -> Vec<&Path> {
        self.levels.iter().flatten().map(PathBuf::as_path).collect()
    }

    /// Run `f` in a nested level. On error the level's rows and files are
    /// discarded and the error is returned; the outer transaction stays usable.
    pub fn atomic<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let name = format!("tilebank_level_{}", self.levels.len());
        self.db.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
        self.levels.push(Vec::new());

        match f(self) {
            Ok(value) => {
                let files = self.levels.pop().unwrap_or_default();
                if let Err(e) = self.db.conn.execute_batch(&format!("RELEASE {}", name)) {
                    remove_files(&files);
                    return Err(e.into());
                }
                if let Some(parent) = self.levels.last_mut() {
                    parent.extend(files);
                }
                Ok(value)
            }
            Err(err) => {
                let files = self.levels.pop().unwrap_or_default();
                if let Err(e) = self
                    .db
                    .conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};", name = name))
                {
                    warn!(savepoint = %name, error = %e, "failed to roll back savepoint");
                }
                remove_files(&files);
                Err(err)
            }
        }
    }

    /// Make every change permanent. Tracked files are no longer at risk.
    pub fn commit(mut self) -> Result<()> {
        self.db.conn.execute_batch("COMMIT")?;
        self.finished = true;
        self.levels.clear();
        Ok(())
    }

    /// Undo every change and delete every tracked file.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.db.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "failed to roll back transaction");
        }
        let files: Vec<PathBuf> = self.levels.drain(..).flatten().collect();
        remove_files(&files);
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("unit of work dropped without commit, rolling back");
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewTimeseries, Timeseries};
    use crate::error::TileBankError;
    use tempfile::tempdir;

    fn timeseries() -> NewTimeseries {
        NewTimeseries {
            start_date: "2024-01-01".into(),
            end_date: "2024-01-02".into(),
        }
    }

    #[test]
    fn test_commit_keeps_rows_and_files() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let file = dir.path().join("kept.npy");

        let mut uow = db.begin().unwrap();
        uow.atomic(|uow| {
            std::fs::write(&file, b"x")?;
            uow.track_file(&file);
            uow.db().insert(&timeseries())
        })
        .unwrap();
        uow.commit().unwrap();

        assert!(file.exists());
        assert_eq!(db.count::<Timeseries>().unwrap(), 1);
    }

    #[test]
    fn test_failed_level_discards_only_itself() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let kept = dir.path().join("kept.npy");
        let lost = dir.path().join("lost.npy");

        let mut uow = db.begin().unwrap();
        uow.atomic(|uow| {
            std::fs::write(&kept, b"x")?;
            uow.track_file(&kept);
            uow.db().insert(&timeseries())
        })
        .unwrap();
        let result: Result<()> = uow.atomic(|uow| {
            std::fs::write(&lost, b"x")?;
            uow.track_file(&lost);
            uow.db().insert(&timeseries())?;
            Err(TileBankError::InvalidInput("boom".into()))
        });
        assert!(result.is_err());
        assert!(!lost.exists());
        assert_eq!(uow.depth(), 1);
        uow.commit().unwrap();

        assert!(kept.exists());
        assert_eq!(db.count::<Timeseries>().unwrap(), 1);
    }

    #[test]
    fn test_nested_success_then_outer_failure_removes_all() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let inner = dir.path().join("inner.npy");

        let mut uow = db.begin().unwrap();
        let result: Result<()> = uow.atomic(|uow| {
            uow.atomic(|uow| {
                std::fs::write(&inner, b"x")?;
                uow.track_file(&inner);
                assert_eq!(uow.depth(), 3);
                uow.db().insert(&timeseries())
            })?;
            assert_eq!(uow.tracked_files(), vec![inner.as_path()]);
            Err(TileBankError::InvalidInput("outer fails".into()))
        });
        assert!(result.is_err());
        assert!(!inner.exists());
        uow.commit().unwrap();
        assert_eq!(db.count::<Timeseries>().unwrap(), 0);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let file = dir.path().join("f.npy");
        {
            let mut uow = db.begin().unwrap();
            std::fs::write(&file, b"x").unwrap();
            uow.track_file(&file);
            uow.db().insert(&timeseries()).unwrap();
        }
        assert!(!file.exists());
        assert_eq!(db.count::<Timeseries>().unwrap(), 0);
    }

    #[test]
    fn test_undeletable_files_do_not_mask_the_error() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let gone = dir.path().join("gone.npy");
        let stuck = dir.path().join("stuck");
        let written = dir.path().join("written.npy");
        std::fs::create_dir(&stuck).unwrap();

        let mut uow = db.begin().unwrap();
        let result: Result<()> = uow.atomic(|uow| {
            uow.track_file(&gone);
            uow.track_file(&stuck);
            std::fs::write(&written, b"x")?;
            uow.track_file(&written);
            uow.db().insert(&timeseries())?;
            Err(TileBankError::InvalidInput("original".into()))
        });
        match result {
            Err(TileBankError::InvalidInput(msg)) => assert_eq!(msg, "original"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!written.exists());
        assert!(stuck.is_dir());
        assert_eq!(uow.depth(), 1);

        std::fs::write(&written, b"x").unwrap();
        uow.track_file(&gone);
        uow.track_file(&stuck);
        uow.track_file(&written);
        uow.rollback();
        assert!(!written.exists());
        assert!(stuck.is_dir());
        assert_eq!(db.count::<Timeseries>().unwrap(), 0);
    }

    #[test]
    fn test_retrack_follows_rename() {
        let dir = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let staged = dir.path().join("staged.npy");
        let final_path = dir.path().join("final.npy");

        let mut uow = db.begin().unwrap();
        std::fs::write(&staged, b"x").unwrap();
        uow.track_file(&staged);
        std::fs::rename(&staged, &final_path).unwrap();
        uow.retrack_file(&staged, &final_path);
        assert_eq!(uow.tracked_files(), vec![final_path.as_path()]);
        uow.rollback();

        assert!(!final_path.exists());
    }
}
