use super::node::{Edge, InputSlot, Next, Node};
use crate::error::{Error, Result};
use crate::grad_mode::set_grad_enabled;
use crate::tensors::Ten64;
use crate::var::Var;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Knobs for a backward traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackwardOptions {
    /// Keep every visited context so the graph can be traversed again.
    pub retain_graph: bool,
    /// Record the gradient computation itself, enabling higher-order
    /// gradients. Implies `retain_graph`.
    pub create_graph: bool,
}

impl BackwardOptions {
    /// Sets `retain_graph`.
    #[must_use]
    pub const fn with_retain_graph(mut self, retain_graph: bool) -> Self {
        self.retain_graph = retain_graph;
        self
    }

    /// Sets `create_graph`.
    #[must_use]
    pub const fn with_create_graph(mut self, create_graph: bool) -> Self {
        self.create_graph = create_graph;
        self
    }
}

/// Computes the gradients of `outputs` with respect to `inputs`.
///
/// `grad_outputs` holds one seed per output. Leaf `.grad()` slots are left
/// untouched. An input the outputs don't depend on gets `None`.
///
/// # Errors
/// - [`Error::GradOutputsCount`] / [`Error::GradientShape`] for bad seeds,
/// - [`Error::NoGradFn`] if an output doesn't require grad,
/// - [`Error::GraphFreed`] when traversing a freed graph,
/// - count, position and shape violations in a descriptor's gradients,
/// - anything a descriptor's backward returns.
pub fn grad(
    outputs: &[Var],
    grad_outputs: &[Var],
    inputs: &[Var],
    options: BackwardOptions,
) -> Result<Vec<Option<Var>>> {
    run_backward(outputs, grad_outputs, options, Some(inputs))
}

/// Gradients collected for explicitly requested inputs.
struct Captures {
    leaves: HashMap<u64, Vec<usize>>,
    outputs: HashMap<(u64, usize), Vec<usize>>,
    grads: Vec<Option<Var>>,
}

impl Captures {
    fn new(inputs: &[Var]) -> Self {
        let mut leaves: HashMap<u64, Vec<usize>> = HashMap::new();
        let mut outputs: HashMap<(u64, usize), Vec<usize>> = HashMap::new();
        for (k, input) in inputs.iter().enumerate() {
            match input.grad_fn() {
                Some(edge) => outputs.entry((edge.node.id, edge.output)).or_default().push(k),
                None => leaves.entry(input.id()).or_default().push(k),
            }
        }
        Self {
            leaves,
            outputs,
            grads: vec![None; inputs.len()],
        }
    }

    fn capture_leaf(&mut self, leaf: &Var, grad: &Var) -> Result<()> {
        if let Some(targets) = self.leaves.get(&leaf.id()) {
            for &k in targets {
                accumulate(&mut self.grads[k], grad.clone())?;
            }
        }
        Ok(())
    }

    fn capture_outputs(&mut self, node: &Node, slots: &[Option<Var>]) {
        for (output, slot) in slots.iter().enumerate() {
            if let Some(targets) = self.outputs.get(&(node.id, output)) {
                for &k in targets {
                    self.grads[k].clone_from(slot);
                }
            }
        }
    }
}

pub(crate) fn run_backward(
    roots: &[Var],
    root_grads: &[Var],
    options: BackwardOptions,
    inputs: Option<&[Var]>,
) -> Result<Vec<Option<Var>>> {
    if roots.len() != root_grads.len() {
        return Err(Error::GradOutputsCount {
            expected: roots.len(),
            got: root_grads.len(),
        });
    }

    let retain = options.retain_graph || options.create_graph;
    let _mode = set_grad_enabled(options.create_graph);
    log::debug!(
        "backward from {} root(s), retain_graph={retain}, create_graph={}",
        roots.len(),
        options.create_graph
    );

    let mut captures = inputs.map(Captures::new);
    let mut buffers: HashMap<u64, Vec<Option<Var>>> = HashMap::new();
    let mut root_nodes: Vec<Arc<Node>> = Vec::new();

    for (index, (root, seed)) in roots.iter().zip(root_grads).enumerate() {
        let expected = root.shape();
        let got = seed.shape();
        if expected != got {
            return Err(Error::GradientShape {
                op: "backward",
                index,
                expected,
                got,
            });
        }
        let seed = if options.create_graph {
            seed.clone()
        } else {
            seed.detach()
        };
        match root.grad_fn() {
            Some(edge) => {
                accumulate_into(&mut buffers, &edge, seed)?;
                root_nodes.push(edge.node);
            }
            None if root.requires_grad() => deliver_leaf(root, &seed, captures.as_mut())?,
            None => return Err(Error::NoGradFn),
        }
    }

    let mut dependencies = count_dependencies(&root_nodes);
    let mut queued = HashSet::new();
    let mut ready: Vec<Arc<Node>> = root_nodes
        .into_iter()
        .filter(|node| !dependencies.contains_key(&node.id) && queued.insert(node.id))
        .collect();

    while let Some(node) = ready.pop() {
        let slots = buffers
            .remove(&node.id)
            .unwrap_or_else(|| vec![None; node.output_shapes.len()]);
        if let Some(captures) = captures.as_mut() {
            captures.capture_outputs(&node, &slots);
        }

        let grad_outputs: Vec<Var> = slots
            .into_iter()
            .zip(&node.output_shapes)
            .map(|(slot, shape)| slot.unwrap_or_else(|| Var::new(Ten64::zeros(shape.clone()))))
            .collect();

        log::trace!("backward through {} (node {})", node.name, node.id);
        let body = node.take_backward(retain)?;
        let grads = check_gradients(&node, body.run(&node, &grad_outputs)?)?;

        for (slot, grad) in node.inputs.iter().zip(grads) {
            let InputSlot::Tensor {
                next: Some(next), ..
            } = slot
            else {
                continue;
            };
            match next {
                Next::Node(edge) => {
                    if let Some(grad) = grad {
                        accumulate_into(&mut buffers, edge, grad)?;
                    }
                    if let Some(count) = dependencies.get_mut(&edge.node.id) {
                        *count -= 1;
                        if *count == 0 {
                            dependencies.remove(&edge.node.id);
                            ready.push(Arc::clone(&edge.node));
                        }
                    }
                }
                Next::Leaf(leaf) => {
                    if let Some(grad) = grad {
                        deliver_leaf(leaf, &grad, captures.as_mut())?;
                    }
                }
            }
        }
    }

    Ok(captures.map(|c| c.grads).unwrap_or_default())
}

/// Number of recorded consumers of every node reachable from `roots`.
fn count_dependencies(roots: &[Arc<Node>]) -> HashMap<u64, usize> {
    let mut dependencies: HashMap<u64, usize> = HashMap::new();
    let mut seen = HashSet::new();
    let mut stack: Vec<Arc<Node>> = roots.to_vec();

    while let Some(node) = stack.pop() {
        if !seen.insert(node.id) {
            continue;
        }
        for slot in &node.inputs {
            if let InputSlot::Tensor {
                next: Some(Next::Node(edge)),
                ..
            } = slot
            {
                *dependencies.entry(edge.node.id).or_insert(0) += 1;
                stack.push(Arc::clone(&edge.node));
            }
        }
    }

    dependencies
}

/// Enforces the one-gradient-per-input contract and drops trailing `None`s.
fn check_gradients(node: &Node, mut grads: Vec<Option<Var>>) -> Result<Vec<Option<Var>>> {
    let expected = node.inputs.len();
    if grads.len() < expected || grads[expected..].iter().any(Option::is_some) {
        return Err(Error::GradientCount {
            op: node.name,
            expected,
            got: grads.len(),
        });
    }
    grads.truncate(expected);

    for (index, (slot, grad)) in node.inputs.iter().zip(&grads).enumerate() {
        match (slot, grad) {
            (InputSlot::Other, Some(_)) => {
                return Err(Error::UnexpectedGradient {
                    op: node.name,
                    index,
                });
            }
            (InputSlot::Tensor { shape, .. }, Some(grad)) => {
                let got = grad.shape();
                if got != *shape {
                    return Err(Error::GradientShape {
                        op: node.name,
                        index,
                        expected: shape.clone(),
                        got,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(grads)
}

fn accumulate(slot: &mut Option<Var>, grad: Var) -> Result<()> {
    let total = match slot.as_ref() {
        Some(prev) => prev.add(&grad)?,
        None => grad,
    };
    *slot = Some(total);
    Ok(())
}

fn accumulate_into(buffers: &mut HashMap<u64, Vec<Option<Var>>>, edge: &Edge, grad: Var) -> Result<()> {
    let slots = buffers
        .entry(edge.node.id)
        .or_insert_with(|| vec![None; edge.node.output_shapes.len()]);
    accumulate(&mut slots[edge.output], grad)
}

fn deliver_leaf(leaf: &Var, grad: &Var, captures: Option<&mut Captures>) -> Result<()> {
    match captures {
        Some(captures) => captures.capture_leaf(leaf, grad),
        None => leaf.accumulate_grad(grad.clone()),
    }
}
