//! Thread-local switch controlling whether operations record graph nodes.
//!
//! Recording is on by default. Descriptor `forward` bodies always run with it
//! off, and a backward traversal turns it on only when `create_graph` is set,
//! so gradient computations themselves become differentiable on request.
//!
//! ```rust
//! use briny_autograd::{grad_mode, tensors::Tensor, Var};
//!
//! let x = Var::parameter(Tensor::ones([2]));
//! let y = {
//!     let _guard = grad_mode::no_grad();
//!     x.add(&x).unwrap()
//! };
//! assert!(!y.requires_grad());
//! assert!(grad_mode::is_grad_enabled());
//! ```

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record graph nodes.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Restores the previous recording state when dropped.
#[must_use = "recording is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GradModeGuard {
    prev: bool,
}

impl Drop for GradModeGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|g| g.set(self.prev));
    }
}

/// Turns recording on or off until the returned guard is dropped.
pub fn set_grad_enabled(enabled: bool) -> GradModeGuard {
    let prev = GRAD_ENABLED.with(|g| g.replace(enabled));
    GradModeGuard { prev }
}

/// Disables recording for the guard's lifetime.
pub fn no_grad() -> GradModeGuard {
    set_grad_enabled(false)
}

/// Enables recording for the guard's lifetime.
pub fn enable_grad() -> GradModeGuard {
    set_grad_enabled(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_restore() {
        assert!(is_grad_enabled());
        {
            let _off = no_grad();
            assert!(!is_grad_enabled());
            {
                let _on = enable_grad();
                assert!(is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }
}
