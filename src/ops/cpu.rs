//! Parallel CPU kernels
//!
//! # CPU Kernels
//!
//! Raw, slice-level implementations of the numeric work behind
//! [`Tensor`](crate::tensors::Tensor) arithmetic. Shape checks happen in the
//! tensor layer; every function here assumes its inputs are consistent.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Optional SIMD acceleration using AVX2 (enabled via `simd` feature flag)
//! - Pure Rust fallback path when SIMD is disabled or unavailable
//!
//! ## Design Goals
//!
//! - Deterministic results: reductions run in a fixed order per output element
//! - No allocation beyond the output buffer

use rayon::prelude::*;

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
use core::arch::x86_64::{_mm256_fmadd_pd, _mm256_loadu_pd, _mm256_set_pd, _mm256_setzero_pd, _mm256_storeu_pd};

/// Computes `C = A × B` for row-major `A: m×k` and `B: k×n`.
///
/// # Optimizations
/// - Uses `rayon` for parallel row computation
/// - Uses AVX2 SIMD for fused multiply-adds (if enabled via `--features=simd`)
#[must_use]
pub fn matmul(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; m * n];
    if n == 0 {
        return out;
    }

    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = dot_column(a, b, i, j, k, n);
        }
    });

    out
}

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
#[allow(unsafe_code)]
fn dot_column(a: &[f64], b: &[f64], i: usize, j: usize, k: usize, n: usize) -> f64 {
    let mut idx = 0;
    // SAFETY: the target is compiled with avx2 and every load stays inside
    // `a[i * k..(i + 1) * k]`.
    let mut acc = unsafe { _mm256_setzero_pd() };
    while idx + 4 <= k {
        unsafe {
            let a_chunk = _mm256_loadu_pd(&a[i * k + idx]);
            let b_chunk = _mm256_set_pd(
                b[(idx + 3) * n + j],
                b[(idx + 2) * n + j],
                b[(idx + 1) * n + j],
                b[idx * n + j],
            );
            acc = _mm256_fmadd_pd(a_chunk, b_chunk, acc);
        }
        idx += 4;
    }

    let mut lanes = [0.0; 4];
    unsafe { _mm256_storeu_pd(lanes.as_mut_ptr(), acc) };
    let mut sum: f64 = lanes.iter().sum();
    for l in idx..k {
        sum += a[i * k + l] * b[l * n + j];
    }
    sum
}

#[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
fn dot_column(a: &[f64], b: &[f64], i: usize, j: usize, k: usize, n: usize) -> f64 {
    let mut sum = 0.0;
    for l in 0..k {
        sum += a[i * k + l] * b[l * n + j];
    }
    sum
}

/// Transposes a row-major `rows×cols` matrix.
#[must_use]
pub fn transpose(a: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    let mut out = vec![0.0; rows * cols];
    if rows == 0 {
        return out;
    }

    out.par_chunks_mut(rows).enumerate().for_each(|(j, row)| {
        for (i, cell) in row.iter_mut().enumerate() {
            *cell = a[i * cols + j];
        }
    });

    out
}

/// Applies `f` element-wise.
pub fn map<F>(a: &[f64], f: F) -> Vec<f64>
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    a.par_iter().map(|&x| f(x)).collect()
}

/// Combines two equally sized slices element-wise.
pub fn zip_map<F>(a: &[f64], b: &[f64], f: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    a.par_iter().zip(b.par_iter()).map(|(&x, &y)| f(x, y)).collect()
}

/// Sums a row-major `rows×cols` matrix over its rows, giving `cols` values.
#[must_use]
pub fn sum_rows(a: &[f64], rows: usize, cols: usize) -> Vec<f64> {
    (0..cols)
        .into_par_iter()
        .map(|j| (0..rows).map(|i| a[i * cols + j]).sum())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_small() {
        // [1 2 3; 4 5 6] x [7 8; 9 10; 11 12]
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        assert_eq!(matmul(&a, &b, 2, 3, 2), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn transpose_rectangular() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(transpose(&a, 2, 3), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn sum_rows_collapses_first_axis() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(sum_rows(&a, 3, 2), vec![9.0, 12.0]);
    }
}
