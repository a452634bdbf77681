//! Core tensor data structures and operations.
//!
//! # Core Tensor Utilities
//!
//! This module defines the numeric container that flows through forward and
//! backward bodies. It is deliberately small: the autograd layer only needs
//! row-major storage and a handful of shape-checked operations.
//!
//! It supports:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Element-wise arithmetic and `exp`
//! - 2-D matrix multiplication and transposition (parallel, see [`crate::ops::cpu`])
//! - Row reductions and row broadcasts (`sum_rows` / `expand_rows`)
//! - Whole-tensor reductions and scalar broadcasts (`sum` / `expand_scalar`)
//! - Compile-time tensor macros
//!
//! ## Design Highlights
//! - Tensors are strongly typed: `Tensor<T>` for any element type, math on `Ten64`
//! - Shape is stored as a `Vec<usize>`; the empty shape `[]` is a scalar
//! - Fallible operations return [`crate::Result`] instead of panicking
//! - The `tensor!` macro supports ergonomic tensor creation from nested arrays
//!
//! ## Limitations
//! - Row-major only
//! - Broadcasting only along the leading axis of a matrix, or from a scalar
//!
//! ## Example
//!
//! ```rust
//! use briny_autograd::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use crate::error::{Error, Result};
use crate::ops::cpu;

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    /// Extent of every axis.
    pub shape: Vec<usize>,
    /// Row-major elements.
    pub data: Vec<T>,
}

/// The tensor type used throughout the autograd layer.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Creates a new tensor, reporting a shape/data mismatch as an error.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if `data.len()` differs from the shape product.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::ShapeMismatch {
                op: "tensor",
                lhs: shape,
                rhs: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of axes.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

impl<T: Clone> Tensor<T> {
    /// A tensor of the given shape with every element set to `value`.
    pub fn full(shape: impl Into<Vec<usize>>, value: T) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }
}

impl Tensor<f64> {
    /// All zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, 0.0)
    }

    /// All ones.
    pub fn ones(shape: impl Into<Vec<usize>>) -> Self {
        Self::full(shape, 1.0)
    }

    /// A rank-0 tensor holding `value`.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// The only element of a single-element tensor.
    #[must_use]
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [x] => Some(*x),
            _ => None,
        }
    }

    /// Applies `f` element-wise.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        Self {
            shape: self.shape.clone(),
            data: cpu::map(&self.data, f),
        }
    }

    /// Combines two tensors of identical shape element-wise.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn zip_map<F>(&self, rhs: &Self, op: &'static str, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        self.expect_same_shape(rhs, op)?;
        Ok(Self {
            shape: self.shape.clone(),
            data: cpu::zip_map(&self.data, &rhs.data, f),
        })
    }

    /// Element-wise sum.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.zip_map(rhs, "add", |a, b| a + b)
    }

    /// Element-wise difference.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.zip_map(rhs, "sub", |a, b| a - b)
    }

    /// Element-wise product.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.zip_map(rhs, "mul", |a, b| a * b)
    }

    /// Multiplies every element by `factor`.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        self.map(move |x| x * factor)
    }

    /// Negates every element.
    #[must_use]
    pub fn neg(&self) -> Self {
        self.map(|x| -x)
    }

    /// Element-wise natural exponential.
    #[must_use]
    pub fn exp(&self) -> Self {
        self.map(f64::exp)
    }

    /// Matrix product of two rank-2 tensors (`m×k · k×n`).
    ///
    /// # Errors
    /// [`Error::Rank`] unless both operands are matrices,
    /// [`Error::ShapeMismatch`] if the inner dimensions differ.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let (m, k) = self.matrix_dims("matmul")?;
        let (k2, n) = rhs.matrix_dims("matmul")?;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                op: "matmul",
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
            });
        }
        Ok(Self {
            shape: vec![m, n],
            data: cpu::matmul(&self.data, &rhs.data, m, k, n),
        })
    }

    /// Transpose of a rank-2 tensor.
    ///
    /// # Errors
    /// [`Error::Rank`] unless `self` is a matrix.
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.matrix_dims("transpose")?;
        Ok(Self {
            shape: vec![cols, rows],
            data: cpu::transpose(&self.data, rows, cols),
        })
    }

    /// Sums a `[n, f]` matrix over its rows, giving a `[f]` vector.
    ///
    /// # Errors
    /// [`Error::Rank`] unless `self` is a matrix.
    pub fn sum_rows(&self) -> Result<Self> {
        let (rows, cols) = self.matrix_dims("sum_rows")?;
        Ok(Self {
            shape: vec![cols],
            data: cpu::sum_rows(&self.data, rows, cols),
        })
    }

    /// Repeats a `[f]` vector `rows` times, giving a `[rows, f]` matrix.
    ///
    /// # Errors
    /// [`Error::Rank`] unless `self` is a vector.
    pub fn expand_rows(&self, rows: usize) -> Result<Self> {
        if self.rank() != 1 {
            return Err(Error::Rank {
                op: "expand_rows",
                expected: 1,
                shape: self.shape.clone(),
            });
        }
        let cols = self.shape[0];
        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            data.extend_from_slice(&self.data);
        }
        Ok(Self {
            shape: vec![rows, cols],
            data,
        })
    }

    /// Sum of every element, as a scalar tensor.
    #[must_use]
    pub fn sum(&self) -> Self {
        Self::scalar(self.data.iter().sum())
    }

    /// Broadcasts a single-element tensor to `shape`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless `self` has exactly one element.
    pub fn expand_scalar(&self, shape: &[usize]) -> Result<Self> {
        let value = self.item().ok_or_else(|| Error::ShapeMismatch {
            op: "expand_scalar",
            lhs: self.shape.clone(),
            rhs: shape.to_vec(),
        })?;
        Ok(Self::full(shape.to_vec(), value))
    }

    fn matrix_dims(&self, op: &'static str) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(Error::Rank {
                op,
                expected: 2,
                shape: self.shape.clone(),
            }),
        }
    }

    fn expect_same_shape(&self, rhs: &Self, op: &'static str) -> Result<()> {
        if self.shape == rhs.shape {
            Ok(())
        } else {
            Err(Error::ShapeMismatch {
                op,
                lhs: self.shape.clone(),
                rhs: rhs.shape.clone(),
            })
        }
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_autograd::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( $crate::tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
