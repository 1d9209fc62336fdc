use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] waypoint_storage::StorageError),
    #[error("failed to (de)serialize cost event: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Which scope a budget limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetBucket {
    Run,
    Session,
}

impl std::fmt::Display for BudgetBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetBucket::Run => write!(f, "run"),
            BudgetBucket::Session => write!(f, "session"),
        }
    }
}

/// Capitalized form used only in the user-facing `BudgetExceeded` message,
/// matching the exact wording callers match against (e.g. "Run budget
/// limit exceeded").
fn capitalize_bucket(bucket: BudgetBucket) -> &'static str {
    match bucket {
        BudgetBucket::Run => "Run",
        BudgetBucket::Session => "Session",
    }
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("{} budget limit exceeded: limit={limit:.6} actual={actual:.6}", capitalize_bucket(*bucket))]
    BudgetExceeded {
        bucket: BudgetBucket,
        limit: f64,
        actual: f64,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
