use crate::error::{Error, Result};
use crate::function::{Args, Context, Function};
use crate::primitives::when;
use crate::tensors::Ten64;
use crate::var::Var;

/// Clamps a tensor to `[lo, hi]` and also returns the pass-through mask.
///
/// Arguments are `(x, lo, hi)` with `lo` and `hi` as scalars. Outputs are
/// `(clamped, mask)` where `mask` is `1.0` wherever `x` was inside the range
/// and `0.0` elsewhere. The mask is marked non-differentiable: it comes back
/// with `requires_grad` off, and any gradient delivered to it is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampWithMask;

impl Function for ClampWithMask {
    const NAME: &'static str = "ClampWithMask";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let x = args.tensor(0)?.value();
        let lo = args.scalar(1)?;
        let hi = args.scalar(2)?;
        if lo > hi {
            return Err(Error::Argument {
                op: Self::NAME,
                index: 2,
                expected: "an upper bound not below the lower bound",
            });
        }

        let clamped = Var::new(x.map(move |v| v.clamp(lo, hi)));
        let mask = Var::new(Ten64 {
            shape: x.shape.clone(),
            data: x
                .data
                .iter()
                .map(|&v| if (lo..=hi).contains(&v) { 1.0 } else { 0.0 })
                .collect(),
        });

        ctx.mark_non_differentiable(&[1]);
        ctx.save_for_backward(&[&mask]);
        Ok(vec![clamped, mask])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        Ok(vec![when(&ctx, 0, || grads[0].mul(&saved[0]))?, None, None])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Arg;
    use crate::tensor;

    #[test]
    fn mask_is_returned_detached() {
        let x = Var::parameter(tensor!([0.5, 2.0, 1.0]));
        let outputs = ClampWithMask
            .apply(vec![Arg::from(&x), Arg::Scalar(0.0), Arg::Scalar(1.0)])
            .unwrap();
        assert!(outputs[0].requires_grad());
        assert!(!outputs[1].requires_grad());
        assert_eq!(outputs[0].value().data, vec![0.5, 1.0, 1.0]);
        assert_eq!(outputs[1].value().data, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let x = Var::parameter(tensor!([0.5]));
        let err = ClampWithMask
            .apply(vec![Arg::from(&x), Arg::Scalar(1.0), Arg::Scalar(0.0)])
            .unwrap_err();
        assert!(matches!(err, Error::Argument { index: 2, .. }));
    }
}
