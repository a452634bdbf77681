//! Differentiable operation descriptors.
//!
//! # Writing a descriptor
//!
//! A descriptor is a value type implementing [`Function`]: a `forward` body,
//! a `backward` body and a typed per-invocation record ([`Function::State`]).
//! External code only ever calls [`Function::apply`], which
//!
//! 1. works out which inputs need gradients,
//! 2. runs `forward` on detached inputs with recording switched off,
//! 3. checks the context's dirty and non-differentiable markers,
//! 4. records a graph node when any input needs a gradient,
//! 5. hands back outputs wired to that node.
//!
//! During traversal, `backward` receives the context by value together with
//! one gradient per forward output, and must return one entry per forward
//! input in the same order. Positions whose input was not a tensor, or whose
//! gradient isn't needed, should be `None`. Extra trailing `None`s are
//! ignored; anything else that doesn't line up is an error.
//!
//! ```rust
//! use briny_autograd::{Args, Context, Function, Result, Var, tensor};
//!
//! #[derive(Debug, Clone, Copy)]
//! struct Square;
//!
//! impl Function for Square {
//!     const NAME: &'static str = "Square";
//!     type State = ();
//!
//!     fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
//!         let x = args.tensor(0)?;
//!         ctx.save_for_backward(&[x]);
//!         let y = x.with_value(|v| v.mul(v))?;
//!         Ok(vec![Var::new(y)])
//!     }
//!
//!     fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
//!         let saved = ctx.saved_tensors()?;
//!         let dx = grads[0].mul(&saved[0])?.scale(2.0)?;
//!         Ok(vec![Some(dx)])
//!     }
//! }
//!
//! let x = Var::parameter(tensor!([3.0]));
//! let y = Square.apply_single(vec![(&x).into()]).unwrap();
//! y.backward().unwrap();
//! assert_eq!(x.grad().unwrap().item(), Some(6.0));
//! ```

use crate::error::{Error, Result};
use crate::grad_mode::{is_grad_enabled, no_grad};
use crate::graph::{BackwardFn, Edge, InputSlot, Node};
use crate::var::Var;
use std::sync::Arc;

/// One positional argument of a descriptor invocation.
#[derive(Debug, Clone)]
pub enum Arg {
    /// A differentiable value.
    Tensor(Var),
    /// A non-differentiable number.
    Scalar(f64),
    /// An optional argument that was left out.
    Absent,
}

impl Arg {
    /// The tensor at this position, if any.
    #[must_use]
    pub const fn as_tensor(&self) -> Option<&Var> {
        match self {
            Self::Tensor(var) => Some(var),
            _ => None,
        }
    }
}

impl From<Var> for Arg {
    fn from(var: Var) -> Self {
        Self::Tensor(var)
    }
}

impl From<&Var> for Arg {
    fn from(var: &Var) -> Self {
        Self::Tensor(var.clone())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Option<&Var>> for Arg {
    fn from(var: Option<&Var>) -> Self {
        var.map_or(Self::Absent, |var| Self::Tensor(var.clone()))
    }
}

/// Positional arguments as seen by `forward`.
///
/// Tensors in here are detached views: they share storage with the caller's
/// values but carry no history.
#[derive(Debug, Clone)]
pub struct Args {
    op: &'static str,
    items: Vec<Arg>,
}

impl Args {
    pub(crate) fn new(op: &'static str, items: Vec<Arg>) -> Self {
        Self { op, items }
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` when there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The raw argument at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.items.get(index)
    }

    /// The tensor at `index`.
    ///
    /// # Errors
    /// [`Error::Argument`] if the position is missing or not a tensor.
    pub fn tensor(&self, index: usize) -> Result<&Var> {
        match self.items.get(index) {
            Some(Arg::Tensor(var)) => Ok(var),
            _ => Err(self.mismatch(index, "a tensor")),
        }
    }

    /// The tensor at `index`, or `None` if it was passed as [`Arg::Absent`]
    /// or left out entirely.
    ///
    /// # Errors
    /// [`Error::Argument`] if the position holds a scalar.
    pub fn optional_tensor(&self, index: usize) -> Result<Option<&Var>> {
        match self.items.get(index) {
            Some(Arg::Tensor(var)) => Ok(Some(var)),
            Some(Arg::Absent) | None => Ok(None),
            Some(Arg::Scalar(_)) => Err(self.mismatch(index, "a tensor or absent")),
        }
    }

    /// The scalar at `index`.
    ///
    /// # Errors
    /// [`Error::Argument`] if the position is missing or not a scalar.
    pub fn scalar(&self, index: usize) -> Result<f64> {
        match self.items.get(index) {
            Some(Arg::Scalar(value)) => Ok(*value),
            _ => Err(self.mismatch(index, "a scalar")),
        }
    }

    const fn mismatch(&self, index: usize, expected: &'static str) -> Error {
        Error::Argument {
            op: self.op,
            index,
            expected,
        }
    }
}

#[derive(Debug, Clone)]
enum SavedKind {
    /// Still as handed to `save_for_backward`; resolved once forward returns.
    Pending,
    /// One of the caller's inputs, history included.
    Input(Var),
    /// The `index`-th output; re-attached to the node on unpacking.
    Output { index: usize, tracked: bool },
    /// Anything else, returned as saved.
    Other,
}

#[derive(Debug, Clone)]
struct Saved {
    view: Var,
    kind: SavedKind,
    version: u64,
}

/// Per-invocation record bridging one forward call to its backward call.
///
/// `S` is the descriptor's own typed state; the rest is bookkeeping shared by
/// every descriptor.
#[derive(Debug, Clone)]
pub struct Context<S> {
    op: &'static str,
    state: S,
    saved: Option<Vec<Saved>>,
    needs_input_grad: Vec<bool>,
    dirty: Vec<usize>,
    non_differentiable: Vec<usize>,
    node: Option<Arc<Node>>,
}

impl<S: Default> Context<S> {
    fn new(op: &'static str, needs_input_grad: Vec<bool>) -> Self {
        Self {
            op,
            state: S::default(),
            saved: None,
            needs_input_grad,
            dirty: Vec::new(),
            non_differentiable: Vec::new(),
            node: None,
        }
    }
}

impl<S> Context<S> {
    /// Name of the descriptor this context belongs to.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.op
    }

    /// The descriptor's typed state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Mutable access to the descriptor's typed state.
    pub const fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Stores the values backward will need. A later call replaces the list.
    ///
    /// Pass forward's (detached) inputs or outputs. Inputs come back in
    /// backward as the caller's original values, outputs come back attached
    /// to this operation, so both take part in higher-order gradients.
    pub fn save_for_backward(&mut self, vars: &[&Var]) {
        self.saved = Some(
            vars.iter()
                .map(|&var| Saved {
                    view: var.clone(),
                    kind: SavedKind::Pending,
                    version: 0,
                })
                .collect(),
        );
    }

    /// The values stored by `save_for_backward`, in order.
    ///
    /// # Errors
    /// - [`Error::NothingSaved`] if forward never saved anything,
    /// - [`Error::SavedTensorModified`] if a saved value was modified in
    ///   place after forward returned.
    pub fn saved_tensors(&self) -> Result<Vec<Var>> {
        let saved = self
            .saved
            .as_ref()
            .ok_or(Error::NothingSaved { op: self.op })?;

        saved
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let current = entry.view.version();
                if current != entry.version {
                    return Err(Error::SavedTensorModified {
                        op: self.op,
                        index,
                        saved: entry.version,
                        current,
                    });
                }
                Ok(match (&entry.kind, &self.node) {
                    (SavedKind::Input(var), _) => var.clone(),
                    (SavedKind::Output { index: output, tracked: true }, Some(node)) => Var::from_output(
                        Arc::clone(entry.view.storage()),
                        Edge {
                            node: Arc::clone(node),
                            output: *output,
                        },
                    ),
                    _ => entry.view.clone(),
                })
            })
            .collect()
    }

    /// Whether the input at `index` needs a gradient.
    #[must_use]
    pub fn needs_input_grad(&self, index: usize) -> bool {
        self.needs_input_grad.get(index).copied().unwrap_or(false)
    }

    /// Per-input "needs gradient" flags, in input order.
    #[must_use]
    pub fn needs_input_grads(&self) -> &[bool] {
        &self.needs_input_grad
    }

    /// Declares that forward modified these inputs in place.
    ///
    /// Every dirty input must also be returned as an output.
    pub fn mark_dirty(&mut self, inputs: &[usize]) {
        self.dirty.extend_from_slice(inputs);
    }

    /// Declares that these outputs carry no gradient.
    pub fn mark_non_differentiable(&mut self, outputs: &[usize]) {
        self.non_differentiable.extend_from_slice(outputs);
    }

    fn is_non_differentiable(&self, output: usize) -> bool {
        self.non_differentiable.contains(&output)
    }

    /// Resolves saved values against the invocation's inputs and outputs.
    fn pack(&mut self, inputs: &[Arg], outputs: &[Var]) {
        let non_differentiable = self.non_differentiable.clone();
        let Some(saved) = self.saved.as_mut() else {
            return;
        };

        for entry in saved.iter_mut() {
            entry.version = entry.view.version();
            entry.kind = if let Some(index) = outputs.iter().position(|o| o.shares_storage(&entry.view)) {
                SavedKind::Output {
                    index,
                    tracked: !non_differentiable.contains(&index),
                }
            } else if let Some(var) = inputs
                .iter()
                .filter_map(Arg::as_tensor)
                .find(|input| input.shares_storage(&entry.view))
            {
                SavedKind::Input(var.clone())
            } else {
                SavedKind::Other
            };
        }
    }
}

/// A differentiable operation: paired forward and backward bodies.
///
/// Implementors are plain values (usually unit structs, or structs holding
/// configuration) and are cloned into every recorded node.
pub trait Function: Clone + Send + Sync + 'static {
    /// Name used in errors and logs.
    const NAME: &'static str;

    /// Typed record forward leaves for backward.
    type State: Clone + Default + Send + Sync + 'static;

    /// Computes the outputs from detached inputs.
    ///
    /// Runs with recording switched off. May save values, mark dirty inputs
    /// and mark non-differentiable outputs on `ctx`.
    ///
    /// # Errors
    /// Whatever the body reports; it is propagated out of `apply`.
    fn forward(&self, ctx: &mut Context<Self::State>, args: &Args) -> Result<Vec<Var>>;

    /// Maps one gradient per output to one gradient (or `None`) per input.
    ///
    /// Recording is on only when the traversal was started with
    /// `create_graph`, so writing the body with [`Var`] operations makes the
    /// descriptor twice differentiable.
    ///
    /// # Errors
    /// Whatever the body reports; it is propagated out of the traversal.
    fn backward(&self, ctx: Context<Self::State>, grad_outputs: &[Var]) -> Result<Vec<Option<Var>>>;

    /// Invokes the descriptor and records it for backward.
    ///
    /// # Errors
    /// Errors from `forward`, plus [`Error::MarkOutOfRange`],
    /// [`Error::Argument`], [`Error::InPlaceOnLeaf`] and
    /// [`Error::DirtyNotReturned`] for inconsistent context markers.
    fn apply(&self, args: Vec<Arg>) -> Result<Vec<Var>> {
        record(self, args)
    }

    /// Like [`apply`](Self::apply) for descriptors with exactly one output.
    ///
    /// # Errors
    /// As `apply`, plus [`Error::OutputCount`] for any other output count.
    fn apply_single(&self, args: Vec<Arg>) -> Result<Var> {
        let mut outputs = self.apply(args)?;
        if outputs.len() != 1 {
            return Err(Error::OutputCount {
                op: Self::NAME,
                expected: 1,
                got: outputs.len(),
            });
        }
        Ok(outputs.remove(0))
    }
}

/// A descriptor waiting in the graph together with its context.
struct Recorded<F: Function> {
    function: F,
    ctx: Context<F::State>,
}

impl<F: Function> BackwardFn for Recorded<F> {
    fn run(&self, node: &Arc<Node>, grad_outputs: &[Var]) -> Result<Vec<Option<Var>>> {
        let mut ctx = self.ctx.clone();
        ctx.node = Some(Arc::clone(node));
        self.function.backward(ctx, grad_outputs)
    }
}

fn record<F: Function>(function: &F, args: Vec<Arg>) -> Result<Vec<Var>> {
    let recording = is_grad_enabled();
    let needs_input_grad: Vec<bool> = args
        .iter()
        .map(|arg| recording && arg.as_tensor().is_some_and(Var::requires_grad))
        .collect();
    let requires_grad = needs_input_grad.iter().any(|&needed| needed);

    let detached = args
        .iter()
        .map(|arg| match arg {
            Arg::Tensor(var) => Arg::Tensor(var.detach()),
            Arg::Scalar(value) => Arg::Scalar(*value),
            Arg::Absent => Arg::Absent,
        })
        .collect();

    let mut ctx = Context::<F::State>::new(F::NAME, needs_input_grad);
    let outputs = {
        let _guard = no_grad();
        function.forward(&mut ctx, &Args::new(F::NAME, detached))?
    };

    for &index in &ctx.non_differentiable {
        if index >= outputs.len() {
            return Err(Error::MarkOutOfRange {
                op: F::NAME,
                index,
                len: outputs.len(),
            });
        }
    }

    // output position -> dirty input position
    let mut dirty_outputs: Vec<Option<usize>> = vec![None; outputs.len()];
    for &index in &ctx.dirty {
        let input = match args.get(index) {
            Some(Arg::Tensor(var)) => var,
            Some(_) => {
                return Err(Error::Argument {
                    op: F::NAME,
                    index,
                    expected: "a tensor to mark dirty",
                });
            }
            None => {
                return Err(Error::MarkOutOfRange {
                    op: F::NAME,
                    index,
                    len: args.len(),
                });
            }
        };
        if recording && input.is_leaf() && input.requires_grad() {
            return Err(Error::InPlaceOnLeaf { op: F::NAME, index });
        }
        let output = outputs
            .iter()
            .position(|o| o.shares_storage(input))
            .ok_or(Error::DirtyNotReturned { op: F::NAME, index })?;
        dirty_outputs[output] = Some(index);
    }

    if !requires_grad {
        return Ok(outputs
            .into_iter()
            .zip(dirty_outputs)
            .map(|(output, dirty)| match dirty.and_then(|index| args[index].as_tensor()) {
                Some(input) => input.clone(),
                None => output,
            })
            .collect());
    }

    let inputs = args
        .iter()
        .zip(ctx.needs_input_grad.iter())
        .map(|(arg, &needed)| match arg {
            Arg::Tensor(var) => InputSlot::Tensor {
                shape: var.shape(),
                next: if needed { var.next_edge() } else { None },
            },
            Arg::Scalar(_) | Arg::Absent => InputSlot::Other,
        })
        .collect();
    let output_shapes = outputs.iter().map(Var::shape).collect();

    ctx.pack(&args, &outputs);
    let tracked: Vec<bool> = (0..outputs.len()).map(|index| !ctx.is_non_differentiable(index)).collect();
    let node = Arc::new(Node::new(
        F::NAME,
        inputs,
        output_shapes,
        Arc::new(Recorded {
            function: function.clone(),
            ctx,
        }),
    ));
    log::debug!(
        "recorded {} (node {}) with {} input(s), {} output(s)",
        F::NAME,
        node.id,
        args.len(),
        outputs.len()
    );

    Ok(outputs
        .into_iter()
        .zip(dirty_outputs)
        .enumerate()
        .map(|(index, (output, dirty))| {
            let edge = Edge {
                node: Arc::clone(&node),
                output: index,
            };
            let dirty_input = dirty.and_then(|input| args[input].as_tensor());
            match dirty_input {
                Some(input) if tracked[index] => {
                    input.rebase(edge);
                    input.clone()
                }
                Some(input) => input.clone(),
                None if !tracked[index] => output.detach(),
                None => Var::from_output(Arc::clone(output.storage()), edge),
            }
        })
        .collect())
}
