use crate::error::{Error, Result};
use crate::function::{Args, Context, Function};
use crate::var::Var;

/// Affine map `input · weightᵀ + bias`.
///
/// Arguments, in order:
///
/// 0. `input`, shape `[n, in_features]`
/// 1. `weight`, shape `[out_features, in_features]`
/// 2. `bias`, shape `[out_features]`, or [`Arg::Absent`](crate::Arg::Absent)
///
/// The output has shape `[n, out_features]`; the bias is added to every row.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFunction;

impl Function for LinearFunction {
    const NAME: &'static str = "LinearFunction";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let input = args.tensor(0)?;
        let weight = args.tensor(1)?;
        let bias = args.optional_tensor(2)?;

        let x = input.value();
        let w = weight.value();
        if x.rank() != 2 || w.rank() != 2 || x.shape[1] != w.shape[1] {
            return Err(Error::ShapeMismatch {
                op: Self::NAME,
                lhs: x.shape,
                rhs: w.shape,
            });
        }

        let mut output = x.matmul(&w.transpose()?)?;
        match bias {
            Some(bias) => {
                let b = bias.value();
                if b.shape != [w.shape[0]] {
                    return Err(Error::ShapeMismatch {
                        op: Self::NAME,
                        lhs: vec![w.shape[0]],
                        rhs: b.shape,
                    });
                }
                output = output.add(&b.expand_rows(x.shape[0])?)?;
                ctx.save_for_backward(&[input, weight, bias]);
            }
            None => ctx.save_for_backward(&[input, weight]),
        }

        Ok(vec![Var::new(output)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        let (input, weight) = (&saved[0], &saved[1]);
        let grad_output = &grads[0];

        let grad_input = if ctx.needs_input_grad(0) {
            Some(grad_output.matmul(weight)?)
        } else {
            None
        };
        let grad_weight = if ctx.needs_input_grad(1) {
            Some(grad_output.t()?.matmul(input)?)
        } else {
            None
        };
        let grad_bias = if saved.len() > 2 && ctx.needs_input_grad(2) {
            Some(grad_output.sum_rows()?)
        } else {
            None
        };

        Ok(vec![grad_input, grad_weight, grad_bias])
    }
}
