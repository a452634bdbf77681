//! briny_autograd: custom differentiable operations for a minimal autodiff engine.
//!
//! Designed around one idea: every differentiable computation, built-in or
//! user-written, is a descriptor with a forward body, a backward body and a
//! per-call context, recorded into a graph and replayed in reverse.
//!
//! # Features
//!
//! - Operation descriptors ([`Function`]) with typed per-call state, saved
//!   values, dirty and non-differentiable markers, and per-input gradient needs.
//! - Dynamic reverse-mode graph with `retain_graph` and `create_graph`, so
//!   backward bodies written with [`Var`] operations are twice differentiable.
//! - Layers that own named parameters and buffers, with explicit absent
//!   placeholders for optional entries.
//! - Finite-difference gradient checking, first and second order.
//! - Binary persistence of layer state.
//!
//! # Modules
//!
//! - [`tensors`] — Core tensor data structures and operations.
//! - [`var`] — Tracked values.
//! - [`function`] — The descriptor contract and its context.
//! - [`graph`] — Backward traversal.
//! - [`primitives`] / [`functions`] — Built-in and ready-made descriptors.
//! - [`layers`] — Parameter-owning wrappers around descriptors.
//! - [`gradcheck`] — Gradient self-checks.
//! - [`modelio`] — Saving and loading of layer state.
//!
//! # Example
//!
//! ```rust
//! use briny_autograd::functions::MulConstant;
//! use briny_autograd::{Arg, Function, Var, tensor};
//!
//! let x = Var::parameter(tensor!([1.0, 2.0]));
//! let y = MulConstant.apply_single(vec![Arg::from(&x), Arg::Scalar(3.0)]).unwrap();
//! y.sum().unwrap().backward().unwrap();
//! assert_eq!(x.grad().unwrap().value().data, vec![3.0, 3.0]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_precision_loss,
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::should_implement_trait,
    clippy::must_use_candidate
)]

pub mod approx;
pub mod error;
pub mod function;
pub mod functions;
pub mod grad_mode;
pub mod gradcheck;
pub mod graph;
pub mod layers;
pub mod modelio;
pub mod ops;
pub mod primitives;
pub mod tensors;
pub mod var;

pub use error::{Error, Result};
pub use function::{Arg, Args, Context, Function};
pub use graph::{BackwardOptions, grad};
pub use tensors::{Ten64, Tensor};
pub use var::Var;
