//! Error taxonomy shared by the buffer, kernel, search and scoring layers.

/// Failure of a buffer, search or scoring operation.
///
/// Low-level errors propagate unchanged up to [`crate::scorer::BatchScorer`],
/// which is the only place a failure is turned into an empty batch result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoreError {
    #[error("cannot allocate an aligned buffer of {rows}x{cols} f32")]
    Allocation { rows: usize, cols: usize },

    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("inference oracle failed: {0}")]
    Oracle(String),

    #[error("tokenizer failed: {0}")]
    Tokenizer(String),
}

impl ScoreError {
    pub(crate) fn mismatch(what: &'static str, expected: usize, got: usize) -> Self {
        ScoreError::DimensionMismatch {
            what,
            expected,
            got,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
