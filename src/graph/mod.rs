//! Reverse-mode traversal of recorded descriptor invocations.
//!
//! Every [`Function::apply`](crate::Function::apply) that involves a value
//! requiring grad records a node: the descriptor, its context, one edge per
//! input position and the shapes of its outputs. Traversal counts how many
//! recorded consumers each reachable node has and runs a node's backward only
//! once all of them have delivered their gradients. Output gradients that
//! never arrive are filled with zeros.
//!
//! [`grad`] returns gradients for chosen inputs; [`Var::backward`](crate::Var::backward)
//! accumulates into leaf `.grad()` slots instead.

mod engine;
mod node;

pub use self::engine::{BackwardOptions, grad};

pub(crate) use self::engine::run_backward;
pub(crate) use self::node::{BackwardFn, Edge, InputSlot, Next, Node};
