use crate::error::{Error, Result};
use crate::var::Var;
use core::fmt;
use spin::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Type-erased backward body of a recorded descriptor.
pub(crate) trait BackwardFn: Send + Sync {
    /// Runs backward with the node that is executing it, so saved outputs can
    /// be re-attached to it.
    fn run(&self, node: &Arc<Node>, grad_outputs: &[Var]) -> Result<Vec<Option<Var>>>;
}

/// The `output`-th result of `node`.
#[derive(Clone)]
pub(crate) struct Edge {
    pub(crate) node: Arc<Node>,
    pub(crate) output: usize,
}

/// Destination of the gradient for one input position.
#[derive(Clone)]
pub(crate) enum Next {
    Node(Edge),
    Leaf(Var),
}

/// What a node remembers about each forward input.
pub(crate) enum InputSlot {
    Tensor {
        shape: Vec<usize>,
        next: Option<Next>,
    },
    Other,
}

/// A recorded descriptor invocation.
pub(crate) struct Node {
    pub(crate) id: u64,
    pub(crate) name: &'static str,
    pub(crate) inputs: Vec<InputSlot>,
    pub(crate) output_shapes: Vec<Vec<usize>>,
    backward: Mutex<Option<Arc<dyn BackwardFn>>>,
}

impl Node {
    pub(crate) fn new(
        name: &'static str,
        inputs: Vec<InputSlot>,
        output_shapes: Vec<Vec<usize>>,
        backward: Arc<dyn BackwardFn>,
    ) -> Self {
        Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            inputs,
            output_shapes,
            backward: Mutex::new(Some(backward)),
        }
    }

    /// Hands out the backward body, leaving it in place only when `retain` is set.
    pub(crate) fn take_backward(&self, retain: bool) -> Result<Arc<dyn BackwardFn>> {
        let mut slot = self.backward.lock();
        let body = if retain { slot.clone() } else { slot.take() };
        body.ok_or(Error::GraphFreed { op: self.name })
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.output_shapes.len())
            .finish()
    }
}
