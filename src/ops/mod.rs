//! # Compute Kernels
//!
//! Numeric kernels used by the tensor layer.
//!
//! ## Submodules
//!
//! - [`cpu`] — Multi-threaded (+ optional SIMD) CPU kernels
//!
//! ## Adding a kernel
//!
//! 1. Implement it over raw slices in [`cpu`], assuming consistent shapes
//! 2. Add the shape-checked wrapper on [`Tensor`](crate::tensors::Tensor)
//! 3. If it should be differentiable, add a descriptor in
//!    [`primitives`](crate::primitives) and a method on [`Var`](crate::Var)
//!
//! ## Feature Flags
//!
//! - `simd` — Enables AVX2-accelerated CPU paths

pub mod cpu;
