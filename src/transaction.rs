use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A compensating action run when a transaction is rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStep {
    /// Remove a file this transaction created.
    RemoveFile(PathBuf),
    /// Remove a directory tree this transaction created.
    RemoveDir(PathBuf),
    /// Put back a file's previous content, or delete it if it did not exist.
    RestoreContent {
        path: PathBuf,
        previous: Option<Vec<u8>>,
    },
    /// Move a staged file back to where it was taken from.
    Unstage { staged: PathBuf, original: PathBuf },
}

/// Work deferred until a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStep {
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
}

/// Explicit unit of work for filesystem mutations.
///
/// Components register their compensating steps here while they mutate the
/// filesystem. The owner finishes the transaction exactly once with
/// [`commit`](Self::commit) or [`rollback`](Self::rollback); a transaction
/// dropped unfinished is rolled back.
#[derive(Debug, Default)]
pub struct Transaction {
    rollback_steps: Vec<RollbackStep>,
    commit_steps: Vec<CommitStep>,
    finished: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_rollback(&mut self, step: RollbackStep) {
        self.rollback_steps.push(step);
    }

    pub fn on_commit(&mut self, step: CommitStep) {
        self.commit_steps.push(step);
    }

    /// Takes over every step registered on `inner`, leaving it finished.
    pub fn absorb(&mut self, mut inner: Transaction) {
        self.rollback_steps.append(&mut inner.rollback_steps);
        self.commit_steps.append(&mut inner.commit_steps);
        inner.finished = true;
    }

    pub fn is_empty(&self) -> bool {
        self.rollback_steps.is_empty() && self.commit_steps.is_empty()
    }

    /// Makes the changes permanent and runs deferred cleanup.
    ///
    /// Cleanup failures are logged; the changes themselves are already in
    /// place, so they never fail the commit.
    pub fn commit(mut self) {
        self.finished = true;
        for step in self.commit_steps.drain(..) {
            let result = match &step {
                CommitStep::RemoveFile(path) if path.exists() => fs::remove_file(path),
                CommitStep::RemoveDir(path) if path.exists() => fs::remove_dir_all(path),
                _ => Ok(()),
            };
            if let Err(e) = result {
                warn!("commit cleanup failed for {step:?}: {e}");
            }
        }
        self.rollback_steps.clear();
        debug!("transaction committed");
    }

    /// Undoes every registered change, newest first.
    pub fn rollback(mut self) {
        self.run_rollback();
    }

    fn run_rollback(&mut self) {
        self.finished = true;
        self.commit_steps.clear();
        while let Some(step) = self.rollback_steps.pop() {
            if let Err(e) = apply_rollback(&step) {
                warn!("rollback step {step:?} failed: {e}");
            } else {
                debug!("rolled back {step:?}");
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            self.run_rollback();
        }
    }
}

fn apply_rollback(step: &RollbackStep) -> std::io::Result<()> {
    match step {
        RollbackStep::RemoveFile(path) => {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        RollbackStep::RemoveDir(path) => {
            if path.exists() {
                fs::remove_dir_all(path)?;
            }
        }
        RollbackStep::RestoreContent { path, previous } => match previous {
            Some(content) => crate::util::write_atomic(path, content)?,
            None => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        },
        RollbackStep::Unstage { staged, original } => {
            if staged.exists() {
                fs::rename(staged, original)?;
            }
        }
    }
    Ok(())
}
