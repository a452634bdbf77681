//! Built-in differentiable operations.
//!
//! Each primitive is an ordinary [`Function`] descriptor, written exactly the
//! way user extensions are, and exposed as a method on [`Var`]. Every backward
//! body is itself expressed with these methods, so gradients computed with
//! `create_graph` can be differentiated again.
//!
//! | method          | forward                 | backward                          |
//! |-----------------|-------------------------|-----------------------------------|
//! | `add`           | `a + b`                 | `g`, `g`                          |
//! | `sub`           | `a - b`                 | `g`, `-g`                         |
//! | `mul`           | `a ⊙ b`                 | `g ⊙ b`, `g ⊙ a`                  |
//! | `neg`           | `-a`                    | `-g`                              |
//! | `scale`         | `k · a`                 | `k · g`                           |
//! | `matmul`        | `a · b`                 | `g · bᵀ`, `aᵀ · g`                |
//! | `t`             | `aᵀ`                    | `gᵀ`                              |
//! | `sum_rows`      | `Σ_rows a`              | `g` repeated over rows            |
//! | `expand_rows`   | `a` repeated `n` times  | `Σ_rows g`                        |
//! | `sum`           | `Σ a`                   | `g` broadcast to `a`'s shape      |
//! | `expand_scalar` | scalar broadcast        | `Σ g`                             |
//! | `exp`           | `eᵃ`                    | `g ⊙ eᵃ` (saved output)           |

use crate::error::Result;
use crate::function::{Arg, Args, Context, Function};
use crate::var::Var;

fn unary<F: Function>(function: &F, a: &Var) -> Result<Var> {
    function.apply_single(vec![Arg::from(a)])
}

fn binary<F: Function>(function: &F, a: &Var, b: &Var) -> Result<Var> {
    function.apply_single(vec![Arg::from(a), Arg::from(b)])
}

/// Wraps a gradient only when the corresponding input asked for one.
pub(crate) fn when<S>(ctx: &Context<S>, index: usize, grad: impl FnOnce() -> Result<Var>) -> Result<Option<Var>> {
    if ctx.needs_input_grad(index) {
        grad().map(Some)
    } else {
        Ok(None)
    }
}

/// Element-wise sum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl Function for Add {
    const NAME: &'static str = "Add";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?.value();
        let b = args.tensor(1)?.value();
        Ok(vec![Var::new(a.add(&b)?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let g = &grads[0];
        Ok(vec![when(&ctx, 0, || Ok(g.clone()))?, when(&ctx, 1, || Ok(g.clone()))?])
    }
}

/// Element-wise difference.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sub;

impl Function for Sub {
    const NAME: &'static str = "Sub";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?.value();
        let b = args.tensor(1)?.value();
        Ok(vec![Var::new(a.sub(&b)?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let g = &grads[0];
        Ok(vec![when(&ctx, 0, || Ok(g.clone()))?, when(&ctx, 1, || g.neg())?])
    }
}

/// Element-wise product.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mul;

impl Function for Mul {
    const NAME: &'static str = "Mul";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?;
        let b = args.tensor(1)?;
        ctx.save_for_backward(&[a, b]);
        Ok(vec![Var::new(a.value().mul(&b.value())?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        let g = &grads[0];
        Ok(vec![
            when(&ctx, 0, || g.mul(&saved[1]))?,
            when(&ctx, 1, || g.mul(&saved[0]))?,
        ])
    }
}

/// Negation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neg;

impl Function for Neg {
    const NAME: &'static str = "Neg";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().neg())])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![when(&ctx, 0, || grads[0].neg())?])
    }
}

/// Multiplication by a fixed factor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scale {
    /// The factor.
    pub factor: f64,
}

impl Function for Scale {
    const NAME: &'static str = "Scale";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().scale(self.factor))])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![when(&ctx, 0, || grads[0].scale(self.factor))?])
    }
}

/// Matrix product.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMul;

impl Function for MatMul {
    const NAME: &'static str = "MatMul";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?;
        let b = args.tensor(1)?;
        ctx.save_for_backward(&[a, b]);
        Ok(vec![Var::new(a.value().matmul(&b.value())?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        let g = &grads[0];
        Ok(vec![
            when(&ctx, 0, || g.matmul(&saved[1].t()?))?,
            when(&ctx, 1, || saved[0].t()?.matmul(g))?,
        ])
    }
}

/// Matrix transpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpose;

impl Function for Transpose {
    const NAME: &'static str = "Transpose";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().transpose()?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![when(&ctx, 0, || grads[0].t())?])
    }
}

/// Sum over the rows of a matrix. The state remembers the row count.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumRows;

impl Function for SumRows {
    const NAME: &'static str = "SumRows";
    type State = usize;

    fn forward(&self, ctx: &mut Context<usize>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?.value();
        let out = a.sum_rows()?;
        *ctx.state_mut() = a.shape[0];
        Ok(vec![Var::new(out)])
    }

    fn backward(&self, ctx: Context<usize>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let rows = *ctx.state();
        Ok(vec![when(&ctx, 0, || grads[0].expand_rows(rows))?])
    }
}

/// Repeats a vector as the rows of a matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandRows {
    /// Number of rows produced.
    pub rows: usize,
}

impl Function for ExpandRows {
    const NAME: &'static str = "ExpandRows";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().expand_rows(self.rows)?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![when(&ctx, 0, || grads[0].sum_rows())?])
    }
}

/// Sum of all elements. The state remembers the input shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl Function for Sum {
    const NAME: &'static str = "Sum";
    type State = Vec<usize>;

    fn forward(&self, ctx: &mut Context<Vec<usize>>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?.value();
        ctx.state_mut().clone_from(&a.shape);
        Ok(vec![Var::new(a.sum())])
    }

    fn backward(&self, ctx: Context<Vec<usize>>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let shape = ctx.state().clone();
        Ok(vec![when(&ctx, 0, || grads[0].expand_scalar(&shape))?])
    }
}

/// Broadcast of a single-element value to a shape. The state remembers the
/// input shape.
#[derive(Debug, Clone, Default)]
pub struct ExpandScalar {
    /// Shape produced.
    pub shape: Vec<usize>,
}

impl Function for ExpandScalar {
    const NAME: &'static str = "ExpandScalar";
    type State = Vec<usize>;

    fn forward(&self, ctx: &mut Context<Vec<usize>>, args: &Args) -> Result<Vec<Var>> {
        let a = args.tensor(0)?.value();
        ctx.state_mut().clone_from(&a.shape);
        Ok(vec![Var::new(a.expand_scalar(&self.shape)?)])
    }

    fn backward(&self, ctx: Context<Vec<usize>>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let input_shape = ctx.state().clone();
        Ok(vec![when(&ctx, 0, || {
            let total = grads[0].sum()?;
            // `sum` yields shape []; restore e.g. [1] or [1, 1]
            if input_shape.is_empty() {
                Ok(total)
            } else {
                total.expand_scalar(&input_shape)
            }
        })?])
    }
}

/// Element-wise exponential; backward reuses the saved output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exp;

impl Function for Exp {
    const NAME: &'static str = "Exp";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let out = Var::new(args.tensor(0)?.value().exp());
        ctx.save_for_backward(&[&out]);
        Ok(vec![out])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        Ok(vec![when(&ctx, 0, || grads[0].mul(&saved[0]))?])
    }
}

impl Var {
    /// Element-wise `self + rhs`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) if the shapes differ.
    pub fn add(&self, rhs: &Self) -> Result<Self> {
        binary(&Add, self, rhs)
    }

    /// Element-wise `self - rhs`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) if the shapes differ.
    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        binary(&Sub, self, rhs)
    }

    /// Element-wise `self ⊙ rhs`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) if the shapes differ.
    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        binary(&Mul, self, rhs)
    }

    /// Element-wise `-self`.
    ///
    /// # Errors
    /// Never fails for well-formed values; the signature matches the other operations.
    pub fn neg(&self) -> Result<Self> {
        unary(&Neg, self)
    }

    /// `factor · self`.
    ///
    /// # Errors
    /// Never fails for well-formed values; the signature matches the other operations.
    pub fn scale(&self, factor: f64) -> Result<Self> {
        unary(&Scale { factor }, self)
    }

    /// Matrix product `self · rhs`.
    ///
    /// # Errors
    /// [`Error::Rank`](crate::Error::Rank) or
    /// [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) for incompatible operands.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        binary(&MatMul, self, rhs)
    }

    /// Matrix transpose.
    ///
    /// # Errors
    /// [`Error::Rank`](crate::Error::Rank) unless `self` is a matrix.
    pub fn t(&self) -> Result<Self> {
        unary(&Transpose, self)
    }

    /// Sum over the rows of a matrix: `[n, f] -> [f]`.
    ///
    /// # Errors
    /// [`Error::Rank`](crate::Error::Rank) unless `self` is a matrix.
    pub fn sum_rows(&self) -> Result<Self> {
        unary(&SumRows, self)
    }

    /// Repeats a vector `rows` times: `[f] -> [rows, f]`.
    ///
    /// # Errors
    /// [`Error::Rank`](crate::Error::Rank) unless `self` is a vector.
    pub fn expand_rows(&self, rows: usize) -> Result<Self> {
        unary(&ExpandRows { rows }, self)
    }

    /// Sum of all elements, as a scalar.
    ///
    /// # Errors
    /// Never fails for well-formed values; the signature matches the other operations.
    pub fn sum(&self) -> Result<Self> {
        unary(&Sum, self)
    }

    /// Broadcasts a single-element value to `shape`.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) unless `self` has one element.
    pub fn expand_scalar(&self, shape: &[usize]) -> Result<Self> {
        unary(
            &ExpandScalar {
                shape: shape.to_vec(),
            },
            self,
        )
    }

    /// Element-wise `eˣ`.
    ///
    /// # Errors
    /// Never fails for well-formed values; the signature matches the other operations.
    pub fn exp(&self) -> Result<Self> {
        unary(&Exp, self)
    }
}
