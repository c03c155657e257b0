//! Scheduling errors.

use texc_ir::IrError;

/// Errors reported by schedule transformations and lowering.
///
/// All of them are reported by the call that caused them.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// No loop in the schedule iterates over the variable.
    #[error("no loop over `{0}` in the schedule")]
    UnknownAxis(String),

    /// Split factors must be at least 1.
    #[error("split factor must be positive, got {0}")]
    InvalidFactor(i32),

    /// The tensor is not reachable from the schedule's outputs.
    #[error("tensor `{0}` is not part of the schedule")]
    UnknownTensor(String),

    /// Outputs must be materialized.
    #[error("cannot inline output tensor `{0}`")]
    InlineOutput(String),

    /// The producer/consumer graph contains a cycle.
    #[error("cyclic dependency through `{0}`")]
    Cycle(String),

    /// More than three loops bound to one kind of GPU index.
    #[error("at most 3 {kind} axes can be bound, got {found}")]
    TooManyGpuAxes { kind: &'static str, found: usize },

    /// A tensor was built in another kernel scope.
    #[error("tensor `{0}` belongs to a different kernel scope")]
    ForeignTensor(String),

    #[error(transparent)]
    Ir(#[from] IrError),
}
