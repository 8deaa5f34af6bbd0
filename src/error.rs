use std::fmt;

/// Errors surfaced by [`crate::Triangulator`] and its consumers.
///
/// Geometric degeneracies that can be resolved locally (near-coincident
/// points, near-collinear triples, near-cocircular quadruples) are *not*
/// represented here: they are absorbed by the merge rule and the
/// adaptive-precision predicates in [`crate::predicates`]. Only structural
/// conditions that the caller must react to are modeled as errors.
#[derive(Clone, Debug, PartialEq)]
pub enum TriangulatorError {
    /// A query or constraint operation was attempted before three
    /// non-collinear vertices had been inserted.
    NotBootstrapped,
    /// A null vertex, a NaN/infinite coordinate, or too few vertices were
    /// supplied for the operation requested.
    InvalidInput(String),
    /// The edge pool could not satisfy an allocation request.
    EdgePoolExhausted,
    /// A constraint could not be embedded without violating one already
    /// present; the embedder still resolves this deterministically
    /// (later constraint wins) rather than failing the insertion, but the
    /// conflict is reported here so the caller can inspect it via
    /// [`crate::Triangulator::integrity_check`].
    ConstraintConflict {
        /// Index of the constraint that lost the tie-break.
        superseded: i32,
        /// Index of the constraint that won the tie-break.
        winner: i32,
    },
}

impl fmt::Display for TriangulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriangulatorError::NotBootstrapped => {
                write!(f, "mesh has fewer than three non-collinear vertices")
            }
            TriangulatorError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TriangulatorError::EdgePoolExhausted => write!(f, "edge pool exhausted"),
            TriangulatorError::ConstraintConflict { superseded, winner } => write!(
                f,
                "constraint {superseded} conflicts with constraint {winner}; {winner} wins"
            ),
        }
    }
}

impl std::error::Error for TriangulatorError {}

pub type TriangulatorResult<T> = Result<T, TriangulatorError>;

/// Result of an [`crate::Triangulator::integrity_check`] or
/// [`crate::voronoi::BoundedVoronoi::integrity_check`] call.
///
/// Unlike [`TriangulatorError`], integrity checks never abort normal
/// operation; they are diagnostics run on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityReport {
    pub passed: bool,
    pub message: String,
}

impl IntegrityReport {
    pub fn ok() -> Self {
        Self {
            passed: true,
            message: String::from("ok"),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}
