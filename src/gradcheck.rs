//! Finite-difference verification of backward bodies.
//!
//! [`gradcheck`] compares the Jacobian a function's recorded graph produces
//! against central differences of its forward computation, element by
//! element, for every input that requires grad. [`gradgradcheck`] does the
//! same for the gradients themselves, computed with `create_graph`.
//!
//! The functions under test take `&[Var]` and return `Vec<Var>`, so a single
//! descriptor, a layer, or any composition of operations can be checked:
//!
//! ```rust
//! use briny_autograd::gradcheck::{GradCheckConfig, gradcheck};
//! use briny_autograd::{Var, tensor};
//!
//! let x = Var::parameter(tensor!([0.5, 1.5]));
//! let passed = gradcheck(
//!     |xs| Ok(vec![xs[0].exp()?.mul(&xs[0])?]),
//!     &[x],
//!     &GradCheckConfig::default(),
//! )
//! .unwrap();
//! assert!(passed);
//! ```

use crate::approx::{DEFAULT_ATOL, DEFAULT_RTOL, Tolerance};
use crate::error::{Error, Result};
use crate::grad_mode::enable_grad;
use crate::graph::{self, BackwardOptions};
use crate::tensors::Ten64;
use crate::var::Var;
use serde::{Deserialize, Serialize};

/// Step size and tolerances of a gradient check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradCheckConfig {
    /// Perturbation used for central differences.
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Absolute tolerance.
    #[serde(default = "default_atol")]
    pub atol: f64,
    /// Relative tolerance, scaled by the magnitude of the numeric estimate.
    #[serde(default = "default_rtol")]
    pub rtol: f64,
}

const fn default_eps() -> f64 {
    1e-6
}

const fn default_atol() -> f64 {
    DEFAULT_ATOL
}

const fn default_rtol() -> f64 {
    DEFAULT_RTOL
}

impl Default for GradCheckConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            atol: default_atol(),
            rtol: default_rtol(),
        }
    }
}

impl GradCheckConfig {
    /// Sets the perturbation size.
    #[must_use]
    pub const fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Sets the absolute tolerance.
    #[must_use]
    pub const fn with_atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    /// Sets the relative tolerance.
    #[must_use]
    pub const fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    /// The tolerance part of the configuration.
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        Tolerance::new(self.atol, self.rtol)
    }

    fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(Error::InvalidConfig(format!("eps must be positive, got {}", self.eps)));
        }
        if self.atol.is_nan() || self.rtol.is_nan() || self.atol < 0.0 || self.rtol < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "tolerances must be non-negative, got atol={} rtol={}",
                self.atol, self.rtol
            )));
        }
        Ok(())
    }
}

/// One Jacobian entry outside tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    /// Position of the input in the argument list.
    pub input: usize,
    /// Flat index of the perturbed input element.
    pub input_element: usize,
    /// Position of the output.
    pub output: usize,
    /// Flat index of the output element.
    pub output_element: usize,
    /// Derivative from the recorded backward.
    pub analytic: f64,
    /// Derivative from central differences.
    pub numeric: f64,
}

/// Outcome of [`check_gradients`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradCheckReport {
    /// Number of Jacobian entries compared.
    pub checked: usize,
    /// Entries outside tolerance.
    pub mismatches: Vec<Mismatch>,
}

impl GradCheckReport {
    /// `true` when every compared entry was within tolerance.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Checks `func`'s gradients against central differences.
///
/// Returns `Ok(false)` on a mismatch (also logged at `warn` level).
///
/// # Errors
/// [`Error::InvalidConfig`] for a bad configuration or when no input requires
/// grad; errors raised by `func` or its backward bodies are propagated.
pub fn gradcheck<F>(func: F, inputs: &[Var], config: &GradCheckConfig) -> Result<bool>
where
    F: Fn(&[Var]) -> Result<Vec<Var>>,
{
    check_gradients(func, inputs, config).map(|report| report.passed())
}

/// Like [`gradcheck`], returning every mismatch instead of a flag.
///
/// The caller's values are never touched: both passes run on fresh leaf
/// copies that keep each input's `requires_grad` flag.
///
/// # Errors
/// As [`gradcheck`], plus [`Error::OutputCount`] if `func` returns a
/// different number of outputs for perturbed inputs.
pub fn check_gradients<F>(func: F, inputs: &[Var], config: &GradCheckConfig) -> Result<GradCheckReport>
where
    F: Fn(&[Var]) -> Result<Vec<Var>>,
{
    config.validate()?;
    let _grad = enable_grad();

    let checked_inputs: Vec<usize> = (0..inputs.len()).filter(|&i| inputs[i].requires_grad()).collect();
    if checked_inputs.is_empty() {
        return Err(Error::InvalidConfig(
            "gradcheck needs at least one input that requires grad".into(),
        ));
    }
    let analytic = analytic_jacobian(&func, inputs, &checked_inputs)?;
    let output_sizes: Vec<usize> = analytic
        .first()
        .map(|per_output| per_output.iter().map(|rows| rows.len()).collect())
        .unwrap_or_default();
    log::debug!(
        "gradcheck: {} input(s) against {} output element(s), eps={}",
        checked_inputs.len(),
        output_sizes.iter().sum::<usize>(),
        config.eps
    );

    let tolerance = config.tolerance();
    let mut report = GradCheckReport::default();
    for (slot, &input) in checked_inputs.iter().enumerate() {
        let numeric = numeric_jacobian(&func, inputs, input, config.eps, output_sizes.len())?;
        for (output, rows) in analytic[slot].iter().enumerate() {
            for (output_element, row) in rows.iter().enumerate() {
                for (input_element, &a) in row.iter().enumerate() {
                    let n = numeric[input_element][output].get(output_element).copied().unwrap_or(0.0);
                    report.checked += 1;
                    if !tolerance.accepts(a, n) {
                        report.mismatches.push(Mismatch {
                            input,
                            input_element,
                            output,
                            output_element,
                            analytic: a,
                            numeric: n,
                        });
                    }
                }
            }
        }
    }

    if let Some(first) = report.mismatches.first() {
        log::warn!(
            "gradient check failed for {} of {} entries; first at input {} element {}, output {} element {}: analytic {} vs numeric {}",
            report.mismatches.len(),
            report.checked,
            first.input,
            first.input_element,
            first.output,
            first.output_element,
            first.analytic,
            first.numeric
        );
    }
    Ok(report)
}

/// Checks the gradients of `func`'s gradients against central differences.
///
/// The first-order gradients are computed with `create_graph` for seeds
/// `grad_outputs`; when none are given, fixed seeds that require grad are
/// generated so the check also covers differentiation through the seeds.
///
/// # Errors
/// As [`gradcheck`], plus [`Error::GradOutputsCount`] /
/// [`Error::GradientShape`] for seeds that don't match the outputs.
pub fn gradgradcheck<F>(
    func: F,
    inputs: &[Var],
    grad_outputs: Option<&[Var]>,
    config: &GradCheckConfig,
) -> Result<bool>
where
    F: Fn(&[Var]) -> Result<Vec<Var>>,
{
    let seeds: Vec<Var> = match grad_outputs {
        Some(seeds) => seeds.to_vec(),
        None => {
            let _grad = enable_grad();
            func(&fresh_copies(inputs))?
                .iter()
                .map(|output| Var::parameter(seed_pattern(output.shape())))
                .collect()
        }
    };

    let split = inputs.len();
    let first_order = move |all: &[Var]| -> Result<Vec<Var>> {
        let (xs, gs) = all.split_at(split);
        let outputs = func(xs)?;
        if outputs.len() != gs.len() {
            return Err(Error::GradOutputsCount {
                expected: outputs.len(),
                got: gs.len(),
            });
        }
        let (outputs, gs): (Vec<Var>, Vec<Var>) = outputs
            .into_iter()
            .zip(gs.iter().cloned())
            .filter(|(output, _)| output.requires_grad())
            .unzip();
        let tracked: Vec<Var> = xs.iter().filter(|x| x.requires_grad()).cloned().collect();
        if outputs.is_empty() || tracked.is_empty() {
            return Ok(tracked.iter().map(|x| Var::new(Ten64::zeros(x.shape()))).collect());
        }

        let grads = graph::grad(&outputs, &gs, &tracked, BackwardOptions::default().with_create_graph(true))?;
        Ok(grads
            .into_iter()
            .zip(&tracked)
            .map(|(grad, x)| grad.unwrap_or_else(|| Var::new(Ten64::zeros(x.shape()))))
            .collect())
    };

    let mut all = inputs.to_vec();
    all.extend(seeds);
    gradcheck(first_order, &all, config)
}

/// Derivatives of every output element with respect to one input, indexed
/// `[output][output_element][input_element]`.
type Jacobian = Vec<Vec<Vec<f64>>>;

/// One [`Jacobian`] per checked input.
fn analytic_jacobian<F>(func: &F, inputs: &[Var], checked: &[usize]) -> Result<Vec<Jacobian>>
where
    F: Fn(&[Var]) -> Result<Vec<Var>>,
{
    let copies = fresh_copies(inputs);
    let outputs = func(&copies)?;
    let targets: Vec<Var> = checked.iter().map(|&i| copies[i].clone()).collect();

    let mut jacobian: Vec<Jacobian> = checked
        .iter()
        .map(|&i| {
            outputs
                .iter()
                .map(|output| vec![vec![0.0; inputs[i].numel()]; output.numel()])
                .collect()
        })
        .collect();

    let options = BackwardOptions::default().with_retain_graph(true);
    for (o, output) in outputs.iter().enumerate() {
        if !output.requires_grad() {
            continue;
        }
        let shape = output.shape();
        for element in 0..output.numel() {
            let mut seed = Ten64::zeros(shape.clone());
            seed.data[element] = 1.0;
            let grads = graph::grad(&[output.clone()], &[Var::new(seed)], &targets, options)?;
            for (slot, grad) in grads.into_iter().enumerate() {
                if let Some(grad) = grad {
                    jacobian[slot][o][element] = grad.value().data;
                }
            }
        }
    }
    Ok(jacobian)
}

/// Central differences for one input, indexed `[input_element][output][output_element]`.
fn numeric_jacobian<F>(func: &F, inputs: &[Var], input: usize, eps: f64, outputs: usize) -> Result<Jacobian>
where
    F: Fn(&[Var]) -> Result<Vec<Var>>,
{
    let evaluate = |element: usize, delta: f64| -> Result<Vec<Ten64>> {
        let copies = fresh_copies(inputs);
        copies[input].update_(|data| data[element] += delta);
        let values: Vec<Ten64> = func(&copies)?.iter().map(Var::value).collect();
        if values.len() != outputs {
            return Err(Error::OutputCount {
                op: "gradcheck",
                expected: outputs,
                got: values.len(),
            });
        }
        Ok(values)
    };

    (0..inputs[input].numel())
        .map(|element| {
            let plus = evaluate(element, eps)?;
            let minus = evaluate(element, -eps)?;
            Ok(plus
                .iter()
                .zip(&minus)
                .map(|(p, m)| {
                    p.data
                        .iter()
                        .zip(&m.data)
                        .map(|(p, m)| (p - m) / (2.0 * eps))
                        .collect()
                })
                .collect())
        })
        .collect()
}

fn fresh_copies(inputs: &[Var]) -> Vec<Var> {
    inputs
        .iter()
        .map(|input| Var::leaf(input.value(), input.requires_grad()))
        .collect()
}

fn seed_pattern(shape: Vec<usize>) -> Ten64 {
    let len = shape.iter().product();
    Ten64::new(shape, (0..len).map(|i| ((i + 1) as f64 * 0.37).sin()).collect())
}
