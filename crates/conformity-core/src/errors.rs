use thiserror::Error;

/// Errors that abort work before any remote call is made. Runtime trouble
/// (provider failures, timeouts, unparseable output) never surfaces here; it
/// degrades into failed indices on the run state instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Two configurations in one sweep map to the same run identifier.
    #[error("run identifier collision: {0}")]
    RunIdCollision(String),

    /// A dataset record has no correct choice marked.
    #[error("example {index} in task '{task}' has no correct choice")]
    MissingGroundTruth { task: String, index: usize },

    /// A resumed checkpoint does not line up with the dataset on disk.
    #[error("checkpoint for '{run_id}' holds {stored} examples, dataset has {expected}")]
    StateMismatch {
        run_id: String,
        stored: usize,
        expected: usize,
    },
}
