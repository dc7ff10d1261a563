use crate::batch::MAX_BATCH_QUADS;

/// Errors surfaced by the flush engine.
///
/// Usage-contract violations (recording through a stale handle, creating a
/// handle in the wrong space) are panics, not variants here: they indicate a
/// caller bug and the engine does not attempt to degrade gracefully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A single uninterrupted batch run exceeded [`MAX_BATCH_QUADS`].
    ///
    /// The engine does not auto-split oversized runs; callers are expected
    /// to chunk their input.
    BatchCapacity { quads: usize },
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BatchCapacity { quads } => write!(
                f,
                "batch run of {} quads exceeds the {} quad limit; runs this large are not supported yet",
                quads, MAX_BATCH_QUADS
            ),
        }
    }
}

impl std::error::Error for RenderError {}
