use briny_autograd::graph::{BackwardOptions, grad};
use briny_autograd::{Arg, Args, Context, Error, Function, Result, Ten64, Var, grad_mode, tensor};

/// `y = 2x`, returning its gradient in a configurable shape.
#[derive(Debug, Clone, Copy)]
struct Double {
    extra: usize,
}

impl Function for Double {
    const NAME: &'static str = "Double";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().scale(2.0))])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let mut out = vec![Some(grads[0].scale(2.0)?)];
        out.extend((0..self.extra).map(|_| Some(grads[0].clone())));
        Ok(out)
    }
}

/// Returns `[Some(g)]` followed by trailing `None`s.
#[derive(Debug, Clone, Copy)]
struct PaddedIdentity;

impl Function for PaddedIdentity {
    const NAME: &'static str = "PaddedIdentity";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value())])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grads[0].clone()), None, None])
    }
}

/// Reads saved tensors without ever saving any.
#[derive(Debug, Clone, Copy)]
struct ForgetsToSave;

impl Function for ForgetsToSave {
    const NAME: &'static str = "ForgetsToSave";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value())])
    }

    fn backward(&self, ctx: Context<()>, _grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        Ok(vec![Some(saved[0].clone())])
    }
}

/// Returns a gradient for a scalar argument.
#[derive(Debug, Clone, Copy)]
struct GradForScalar;

impl Function for GradForScalar {
    const NAME: &'static str = "GradForScalar";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().scale(args.scalar(1)?))])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grads[0].clone()), Some(grads[0].clone())])
    }
}

/// `y = a + b` whose backward forgets the second gradient.
#[derive(Debug, Clone, Copy)]
struct FirstOnly;

impl Function for FirstOnly {
    const NAME: &'static str = "FirstOnly";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value().add(&args.tensor(1)?.value())?)])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grads[0].clone())])
    }
}

/// Returns a gradient one element longer than its input.
#[derive(Debug, Clone, Copy)]
struct Widened;

impl Function for Widened {
    const NAME: &'static str = "Widened";
    type State = ();

    fn forward(&self, _ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        Ok(vec![Var::new(args.tensor(0)?.value())])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(Var::new(Ten64::ones(vec![grads[0].numel() + 1])))])
    }
}

/// Marks its input dirty but returns a fresh value.
#[derive(Debug, Clone, Copy)]
struct DirtyButFresh;

impl Function for DirtyButFresh {
    const NAME: &'static str = "DirtyButFresh";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        ctx.mark_dirty(&[0]);
        Ok(vec![Var::new(args.tensor(0)?.value())])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grads[0].clone())])
    }
}

/// Marks positions past the end of its inputs or outputs.
#[derive(Debug, Clone, Copy)]
struct MarksPastEnd {
    dirty: bool,
}

impl Function for MarksPastEnd {
    const NAME: &'static str = "MarksPastEnd";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        if self.dirty {
            ctx.mark_dirty(&[3]);
        } else {
            ctx.mark_non_differentiable(&[1]);
        }
        Ok(vec![Var::new(args.tensor(0)?.value())])
    }

    fn backward(&self, _ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        Ok(vec![Some(grads[0].clone())])
    }
}

/// Records which inputs asked for gradients.
#[derive(Debug, Clone, Copy)]
struct NeedsProbe;

impl Function for NeedsProbe {
    const NAME: &'static str = "NeedsProbe";
    type State = Vec<bool>;

    fn forward(&self, ctx: &mut Context<Vec<bool>>, args: &Args) -> Result<Vec<Var>> {
        let needs = ctx.needs_input_grads().to_vec();
        *ctx.state_mut() = needs;
        Ok(vec![Var::new(args.tensor(0)?.value().add(&args.tensor(1)?.value())?)])
    }

    fn backward(&self, ctx: Context<Vec<bool>>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        assert_eq!(ctx.state().as_slice(), ctx.needs_input_grads());
        let g = &grads[0];
        Ok(vec![
            ctx.needs_input_grad(0).then(|| g.clone()),
            ctx.needs_input_grad(1).then(|| g.clone()),
        ])
    }
}

#[test]
fn test_gradient_count_mismatch_is_an_error() {
    let x = Var::parameter(tensor!([1.0]));
    let y = Double { extra: 1 }.apply_single(vec![Arg::from(&x)]).unwrap();
    let err = y.backward().unwrap_err();
    assert!(matches!(
        err,
        Error::GradientCount {
            op: "Double",
            expected: 1,
            got: 2
        }
    ));
}

#[test]
fn test_too_few_gradients_is_an_error() {
    let a = Var::parameter(tensor!([1.0]));
    let b = Var::parameter(tensor!([2.0]));
    let y = FirstOnly.apply_single(vec![Arg::from(&a), Arg::from(&b)]).unwrap();
    assert!(matches!(
        y.backward(),
        Err(Error::GradientCount {
            op: "FirstOnly",
            expected: 2,
            got: 1
        })
    ));
}

#[test]
fn test_gradient_shape_from_backward_is_checked() {
    let x = Var::parameter(tensor!([1.0, 2.0]));
    let y = Widened.apply_single(vec![Arg::from(&x)]).unwrap();
    let err = y.sum().unwrap().backward().unwrap_err();
    match err {
        Error::GradientShape { op, index, expected, got } => {
            assert_eq!(op, "Widened");
            assert_eq!(index, 0);
            assert_eq!(expected, vec![2]);
            assert_eq!(got, vec![3]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(x.grad().is_none());
}

#[test]
fn test_dirty_input_must_be_returned() {
    let x = Var::new(tensor!([1.0, 2.0]));
    let err = DirtyButFresh.apply(vec![Arg::from(&x)]).unwrap_err();
    assert!(matches!(err, Error::DirtyNotReturned { op: "DirtyButFresh", index: 0 }));
}

#[test]
fn test_marks_out_of_range_are_rejected() {
    let x = Var::parameter(tensor!([1.0]));
    let err = MarksPastEnd { dirty: false }
        .apply(vec![Arg::from(&x)])
        .unwrap_err();
    assert!(matches!(err, Error::MarkOutOfRange { index: 1, len: 1, .. }));

    let err = MarksPastEnd { dirty: true }
        .apply(vec![Arg::from(&x)])
        .unwrap_err();
    assert!(matches!(err, Error::MarkOutOfRange { index: 3, len: 1, .. }));
}

#[test]
fn test_trailing_none_gradients_are_tolerated() {
    let x = Var::parameter(tensor!([1.0, 2.0]));
    let y = PaddedIdentity.apply_single(vec![Arg::from(&x)]).unwrap();
    y.sum().unwrap().backward().unwrap();
    assert_eq!(x.grad().unwrap().value().data, vec![1.0, 1.0]);
}

#[test]
fn test_gradient_for_non_tensor_is_rejected() {
    let x = Var::parameter(tensor!([1.0]));
    let y = GradForScalar.apply_single(vec![Arg::from(&x), Arg::Scalar(2.0)]).unwrap();
    assert!(matches!(
        y.backward(),
        Err(Error::UnexpectedGradient { index: 1, .. })
    ));
}

#[test]
fn test_reading_unsaved_context_is_an_error() {
    let x = Var::parameter(tensor!([1.0]));
    let y = ForgetsToSave.apply_single(vec![Arg::from(&x)]).unwrap();
    assert!(matches!(y.backward(), Err(Error::NothingSaved { op: "ForgetsToSave" })));
}

#[test]
fn test_graph_is_freed_without_retain() {
    let x = Var::parameter(tensor!([3.0]));
    let y = x.mul(&x).unwrap();
    y.backward().unwrap();
    assert!(matches!(y.backward(), Err(Error::GraphFreed { op: "Mul" })));
}

#[test]
fn test_retain_graph_allows_second_pass() {
    let x = Var::parameter(tensor!([3.0]));
    let y = x.mul(&x).unwrap();
    let seed = Var::new(tensor!([1.0]));
    let retain = BackwardOptions::default().with_retain_graph(true);
    y.backward_with(&seed, retain).unwrap();
    y.backward_with(&seed, retain).unwrap();
    assert_eq!(x.grad().unwrap().item(), Some(12.0));
}

#[test]
fn test_saved_tensor_modified_in_place_is_detected() {
    let a = Var::parameter(tensor!([2.0]));
    let b = Var::parameter(tensor!([3.0]));
    let y = a.mul(&b).unwrap();
    b.update_(|d| d[0] = 10.0);
    assert!(matches!(
        y.backward(),
        Err(Error::SavedTensorModified {
            op: "Mul",
            saved: 0,
            current: 1,
            ..
        })
    ));
}

#[test]
fn test_needs_input_grad_follows_requires_grad() {
    let tracked = Var::parameter(tensor!([1.0]));
    let constant = Var::new(tensor!([2.0]));
    let y = NeedsProbe
        .apply_single(vec![Arg::from(&constant), Arg::from(&tracked)])
        .unwrap();
    y.backward().unwrap();
    assert_eq!(tracked.grad().unwrap().item(), Some(1.0));
    assert!(constant.grad().is_none());
}

#[test]
fn test_no_grad_records_nothing() {
    let x = Var::parameter(tensor!([1.0]));
    let y = {
        let _guard = grad_mode::no_grad();
        x.scale(2.0).unwrap()
    };
    assert!(!y.requires_grad());
    assert!(matches!(y.backward(), Err(Error::NoGradFn)));
}

#[test]
fn test_grad_returns_without_touching_leaves() {
    let x = Var::parameter(tensor!([1.0, 2.0]));
    let unused = Var::parameter(tensor!([5.0]));
    let y = x.mul(&x).unwrap().sum().unwrap();

    let grads = grad(
        &[y],
        &[Var::new(tensor!(1.0))],
        &[x.clone(), unused],
        BackwardOptions::default(),
    )
    .unwrap();
    assert_eq!(grads[0].as_ref().unwrap().value().data, vec![2.0, 4.0]);
    assert!(grads[1].is_none());
    assert!(x.grad().is_none());
}

#[test]
fn test_grad_with_respect_to_intermediate() {
    let x = Var::parameter(tensor!([1.0, 2.0]));
    let h = x.scale(3.0).unwrap();
    let y = h.mul(&h).unwrap().sum().unwrap();
    let grads = grad(&[y], &[Var::new(tensor!(1.0))], &[h], BackwardOptions::default()).unwrap();
    // dy/dh = 2h
    assert_eq!(grads[0].as_ref().unwrap().value().data, vec![6.0, 12.0]);
}

#[test]
fn test_seed_shape_is_checked() {
    let x = Var::parameter(tensor!([1.0, 2.0]));
    let y = x.scale(2.0).unwrap();
    let err = y
        .backward_with(&Var::new(tensor!([1.0])), BackwardOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::GradientShape { index: 0, .. }));
}

#[test]
fn test_double_backward_through_exp() {
    let x = Var::parameter(tensor!([0.5, 0.0, 1.0]));
    let y = x.exp().unwrap().sum().unwrap();

    let create = BackwardOptions::default().with_create_graph(true);
    let first = grad(&[y], &[Var::new(tensor!(1.0))], &[x.clone()], create).unwrap();
    let dx = first[0].clone().unwrap();
    assert!(dx.requires_grad());

    let second = grad(
        &[dx.sum().unwrap()],
        &[Var::new(tensor!(1.0))],
        &[x.clone()],
        BackwardOptions::default(),
    )
    .unwrap();
    let expected: Vec<f64> = x.value().data.iter().map(|v| v.exp()).collect();
    let got = second[0].as_ref().unwrap().value().data;
    for (g, e) in got.iter().zip(&expected) {
        assert!((g - e).abs() < 1e-12);
    }
}

#[test]
fn test_diamond_graph_sums_both_paths() {
    let x = Var::parameter(tensor!([2.0]));
    let a = x.scale(3.0).unwrap();
    let b = x.mul(&x).unwrap();
    let y = a.add(&b).unwrap();
    y.backward().unwrap();
    // dy/dx = 3 + 2x
    assert_eq!(x.grad().unwrap().item(), Some(7.0));
}
