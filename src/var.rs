//! Tracked values.
//!
//! A [`Var`] is a cheaply clonable handle to a tensor plus the bookkeeping the
//! backward traversal needs:
//!
//! - a storage shared with every detached view of the same value,
//! - a version counter bumped by each in-place update of that storage,
//! - a `requires_grad` flag and, for non-leaves, the edge to the node that
//!   produced it,
//! - a gradient slot that leaves accumulate into.
//!
//! Values produced by descriptors are created through
//! [`Function::apply`](crate::Function::apply); everything else is a leaf.

use crate::error::{Error, Result};
use crate::graph::{self, BackwardOptions, Edge, Next};
use crate::tensors::Ten64;
use core::fmt;
use spin::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// Tensor data shared between a value and its detached views.
pub(crate) struct Storage {
    data: RwLock<Ten64>,
    version: AtomicU64,
}

impl Storage {
    fn new(value: Ten64) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(value),
            version: AtomicU64::new(0),
        })
    }
}

struct VarInner {
    id: u64,
    storage: Arc<Storage>,
    requires_grad: AtomicBool,
    grad_fn: RwLock<Option<Edge>>,
    grad: Mutex<Option<Var>>,
}

/// A tensor tracked by the autograd graph.
#[derive(Clone)]
pub struct Var {
    inner: Arc<VarInner>,
}

impl Var {
    fn from_parts(storage: Arc<Storage>, requires_grad: bool, grad_fn: Option<Edge>) -> Self {
        Self {
            inner: Arc::new(VarInner {
                id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
                storage,
                requires_grad: AtomicBool::new(requires_grad),
                grad_fn: RwLock::new(grad_fn),
                grad: Mutex::new(None),
            }),
        }
    }

    /// A constant: no history, never receives a gradient.
    #[must_use]
    pub fn new(value: Ten64) -> Self {
        Self::leaf(value, false)
    }

    /// A trainable leaf that accumulates gradients.
    #[must_use]
    pub fn parameter(value: Ten64) -> Self {
        Self::leaf(value, true)
    }

    /// A leaf with an explicit `requires_grad` flag.
    #[must_use]
    pub fn leaf(value: Ten64, requires_grad: bool) -> Self {
        Self::from_parts(Storage::new(value), requires_grad, None)
    }

    pub(crate) fn from_output(storage: Arc<Storage>, edge: Edge) -> Self {
        Self::from_parts(storage, true, Some(edge))
    }

    /// Process-unique identifier of this handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether gradients flow to or through this value.
    #[must_use]
    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad.load(Ordering::Acquire)
    }

    /// `true` unless this value was produced by a recorded operation.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.inner.grad_fn.read().is_none()
    }

    /// Name of the descriptor that produced this value, if any.
    #[must_use]
    pub fn grad_fn_name(&self) -> Option<&'static str> {
        self.inner.grad_fn.read().as_ref().map(|edge| edge.node.name)
    }

    /// Shape of the current value.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.inner.storage.data.read().shape.clone()
    }

    /// Number of elements of the current value.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.inner.storage.data.read().numel()
    }

    /// A copy of the current value.
    #[must_use]
    pub fn value(&self) -> Ten64 {
        self.inner.storage.data.read().clone()
    }

    /// Borrows the current value for the duration of `f`.
    pub fn with_value<R>(&self, f: impl FnOnce(&Ten64) -> R) -> R {
        f(&self.inner.storage.data.read())
    }

    /// The only element of a single-element value.
    #[must_use]
    pub fn item(&self) -> Option<f64> {
        self.inner.storage.data.read().item()
    }

    /// Number of in-place updates applied to the underlying storage.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.storage.version.load(Ordering::Acquire)
    }

    /// A view of the same storage with no history and `requires_grad` off.
    #[must_use]
    pub fn detach(&self) -> Self {
        Self::from_parts(Arc::clone(&self.inner.storage), false, None)
    }

    /// Whether two handles view the same storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    /// Mutates the data in place and bumps the version counter.
    ///
    /// The shape can't change. Every view of the storage observes the update.
    pub fn update_<F: FnOnce(&mut [f64])>(&self, f: F) {
        let mut data = self.inner.storage.data.write();
        f(&mut data.data);
        self.inner.storage.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Gradient accumulated into this leaf by previous backward passes.
    #[must_use]
    pub fn grad(&self) -> Option<Self> {
        self.inner.grad.lock().clone()
    }

    /// Clears the accumulated gradient.
    ///
    /// This also releases the graph a `create_graph` pass stored here.
    pub fn zero_grad(&self) {
        *self.inner.grad.lock() = None;
    }

    /// Backpropagates from a single-element value with an implicit gradient of one.
    ///
    /// # Errors
    /// [`Error::NonScalarRoot`] for multi-element values, plus anything the
    /// traversal reports (see [`graph::grad`]).
    pub fn backward(&self) -> Result<()> {
        let shape = self.shape();
        if self.numel() != 1 {
            return Err(Error::NonScalarRoot(shape));
        }
        self.backward_with(&Self::new(Ten64::ones(shape)), BackwardOptions::default())
    }

    /// Backpropagates `grad` from this value, accumulating into leaf gradients.
    ///
    /// With `create_graph`, each leaf's `.grad()` keeps its own graph, and
    /// that graph refers back to the leaf. The leaf stays alive until
    /// [`zero_grad`](Self::zero_grad) clears the slot. [`graph::grad`]
    /// returns the gradients instead and leaves no such cycle.
    ///
    /// # Errors
    /// Anything the traversal reports (see [`graph::grad`]).
    pub fn backward_with(&self, grad: &Self, options: BackwardOptions) -> Result<()> {
        graph::run_backward(&[self.clone()], &[grad.clone()], options, None).map(|_| ())
    }

    pub(crate) fn storage(&self) -> &Arc<Storage> {
        &self.inner.storage
    }

    pub(crate) fn grad_fn(&self) -> Option<Edge> {
        self.inner.grad_fn.read().clone()
    }

    /// Points this handle at a new producer after an in-place operation.
    pub(crate) fn rebase(&self, edge: Edge) {
        *self.inner.grad_fn.write() = Some(edge);
        self.inner.requires_grad.store(true, Ordering::Release);
    }

    /// Where gradients for this value should be sent, if anywhere.
    pub(crate) fn next_edge(&self) -> Option<Next> {
        match self.grad_fn() {
            Some(edge) => Some(Next::Node(edge)),
            None if self.requires_grad() => Some(Next::Leaf(self.clone())),
            None => None,
        }
    }

    pub(crate) fn accumulate_grad(&self, grad: Self) -> Result<()> {
        let mut slot = self.inner.grad.lock();
        let total = match slot.as_ref() {
            Some(prev) => prev.add(&grad)?,
            None => grad,
        };
        *slot = Some(total);
        Ok(())
    }
}

impl From<Ten64> for Var {
    fn from(value: Ten64) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("id", &self.id())
            .field("shape", &self.shape())
            .field("requires_grad", &self.requires_grad())
            .field("grad_fn", &self.grad_fn_name())
            .field("version", &self.version())
            .finish()
    }
}
