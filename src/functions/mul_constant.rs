use crate::error::Result;
use crate::function::{Args, Context, Function};
use crate::primitives::when;
use crate::var::Var;

/// Multiplies a tensor by a plain number: `(x, c) -> c · x`.
///
/// The constant is passed as [`Arg::Scalar`](crate::Arg::Scalar) and kept in
/// the context state; its gradient slot is always `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MulConstant;

impl Function for MulConstant {
    const NAME: &'static str = "MulConstant";
    type State = f64;

    fn forward(&self, ctx: &mut Context<f64>, args: &Args) -> Result<Vec<Var>> {
        let x = args.tensor(0)?;
        let constant = args.scalar(1)?;
        *ctx.state_mut() = constant;
        Ok(vec![Var::new(x.value().scale(constant))])
    }

    fn backward(&self, ctx: Context<f64>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let constant = *ctx.state();
        Ok(vec![when(&ctx, 0, || grads[0].scale(constant))?, None])
    }
}
