//! Crate-wide error type.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors raised by
//! a descriptor's `forward` or `backward` propagate unchanged to whoever
//! called `apply` or started the backward traversal.

use thiserror::Error;

/// Shorthand for results carrying an [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong while recording or differentiating operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Two operands (or a tensor and its data) disagree on shape.
    #[error("{op}: shape mismatch between {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        /// Operation that detected the mismatch.
        op: &'static str,
        /// Left-hand (or declared) shape.
        lhs: Vec<usize>,
        /// Right-hand (or actual) shape.
        rhs: Vec<usize>,
    },

    /// A tensor of the wrong rank was passed.
    #[error("{op}: expected a rank-{expected} tensor, got shape {shape:?}")]
    Rank {
        /// Operation that detected the mismatch.
        op: &'static str,
        /// Rank the operation works on.
        expected: usize,
        /// Shape actually received.
        shape: Vec<usize>,
    },

    /// A positional argument had the wrong kind or was missing.
    #[error("{op}: argument {index} should be {expected}")]
    Argument {
        /// Descriptor name.
        op: &'static str,
        /// Position of the argument.
        index: usize,
        /// What the descriptor expected at that position.
        expected: &'static str,
    },

    /// `forward` produced a different number of outputs than the caller asked for.
    #[error("{op}: forward returned {got} outputs, expected {expected}")]
    OutputCount {
        /// Descriptor name.
        op: &'static str,
        /// Number of outputs expected.
        expected: usize,
        /// Number of outputs returned.
        got: usize,
    },

    /// `backward` returned a gradient list that doesn't line up with forward's inputs.
    #[error("{op}: backward returned {got} gradients, but forward took {expected} inputs")]
    GradientCount {
        /// Descriptor name.
        op: &'static str,
        /// Number of forward inputs.
        expected: usize,
        /// Number of gradients returned.
        got: usize,
    },

    /// `backward` returned a gradient whose shape differs from its input.
    #[error("{op}: gradient {index} has shape {got:?}, expected {expected:?}")]
    GradientShape {
        /// Descriptor name.
        op: &'static str,
        /// Input position.
        index: usize,
        /// Shape of the forward input.
        expected: Vec<usize>,
        /// Shape of the returned gradient.
        got: Vec<usize>,
    },

    /// `backward` returned a value at a position whose forward input was not a tensor.
    #[error("{op}: backward returned a gradient at position {index}, but that input is not a tensor")]
    UnexpectedGradient {
        /// Descriptor name.
        op: &'static str,
        /// Input position.
        index: usize,
    },

    /// `saved_tensors` was called but forward never saved anything.
    #[error("{op}: backward asked for saved tensors but forward never called save_for_backward")]
    NothingSaved {
        /// Descriptor name.
        op: &'static str,
    },

    /// A tensor saved for backward was modified in place after forward.
    #[error("{op}: saved tensor {index} was modified in place (version {saved} -> {current})")]
    SavedTensorModified {
        /// Descriptor name.
        op: &'static str,
        /// Position in the saved list.
        index: usize,
        /// Version recorded when forward finished.
        saved: u64,
        /// Version observed in backward.
        current: u64,
    },

    /// A node's context was already consumed by an earlier traversal.
    #[error("{op}: graph already freed; backward through it again with retain_graph set")]
    GraphFreed {
        /// Descriptor name.
        op: &'static str,
    },

    /// A leaf that requires grad was marked dirty.
    #[error("{op}: input {index} is a leaf that requires grad and cannot be modified in place")]
    InPlaceOnLeaf {
        /// Descriptor name.
        op: &'static str,
        /// Input position.
        index: usize,
    },

    /// An input was marked dirty but forward did not return it.
    #[error("{op}: input {index} was marked dirty but is not among the outputs")]
    DirtyNotReturned {
        /// Descriptor name.
        op: &'static str,
        /// Input position.
        index: usize,
    },

    /// `mark_dirty` or `mark_non_differentiable` named a position that doesn't exist.
    #[error("{op}: marked position {index} is out of range for {len} values")]
    MarkOutOfRange {
        /// Descriptor name.
        op: &'static str,
        /// Position given.
        index: usize,
        /// Number of inputs or outputs.
        len: usize,
    },

    /// Backward was started from a value with no history that doesn't require grad.
    #[error("value does not require grad and has no grad_fn")]
    NoGradFn,

    /// `backward()` without an explicit gradient needs a single-element root.
    #[error("implicit gradient only works for single-element outputs, got shape {0:?}")]
    NonScalarRoot(Vec<usize>),

    /// `grad` got a different number of gradients than outputs.
    #[error("got {got} grad_outputs for {expected} outputs")]
    GradOutputsCount {
        /// Number of outputs.
        expected: usize,
        /// Number of grad_outputs.
        got: usize,
    },

    /// A parameter or buffer name is already taken.
    #[error("`{0}` is already registered")]
    DuplicateName(String),

    /// A parameter or buffer name is empty or contains `.`.
    #[error("invalid parameter or buffer name `{0}`")]
    InvalidName(String),

    /// No parameter or buffer has this name.
    #[error("no parameter or buffer named `{0}`")]
    UnknownName(String),

    /// A layer configuration can't be built.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A state record is malformed or doesn't match the registry.
    #[error("malformed state record: {0}")]
    Record(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
