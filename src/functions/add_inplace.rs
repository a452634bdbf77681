use crate::error::{Error, Result};
use crate::function::{Args, Context, Function};
use crate::primitives::when;
use crate::var::Var;

/// `target += other`, modifying `target`'s storage.
///
/// The target is marked dirty and returned as the only output, so after the
/// call the caller's handle points at this operation. Applying it to a leaf
/// that requires grad while recording fails with [`Error::InPlaceOnLeaf`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddInPlace;

impl Function for AddInPlace {
    const NAME: &'static str = "AddInPlace";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let target = args.tensor(0)?;
        let other = args.tensor(1)?.value();
        if target.shape() != other.shape {
            return Err(Error::ShapeMismatch {
                op: Self::NAME,
                lhs: target.shape(),
                rhs: other.shape,
            });
        }

        target.update_(|data| {
            for (t, o) in data.iter_mut().zip(&other.data) {
                *t += o;
            }
        });
        ctx.mark_dirty(&[0]);
        Ok(vec![target.clone()])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let g = &grads[0];
        Ok(vec![when(&ctx, 0, || Ok(g.clone()))?, when(&ctx, 1, || Ok(g.clone()))?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Arg;
    use crate::tensor;

    #[test]
    fn untracked_target_is_updated_in_place() {
        let target = Var::new(tensor!([1.0, 2.0]));
        let other = Var::new(tensor!([10.0, 20.0]));
        let out = AddInPlace.apply_single(vec![Arg::from(&target), Arg::from(&other)]).unwrap();
        assert!(out.shares_storage(&target));
        assert_eq!(target.value().data, vec![11.0, 22.0]);
        assert_eq!(target.version(), 1);
    }

    #[test]
    fn tracked_leaf_target_is_rejected() {
        let target = Var::parameter(tensor!([1.0]));
        let other = Var::new(tensor!([1.0]));
        let err = AddInPlace
            .apply_single(vec![Arg::from(&target), Arg::from(&other)])
            .unwrap_err();
        assert!(matches!(err, Error::InPlaceOnLeaf { index: 0, .. }));
    }
}
