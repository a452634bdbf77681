use briny_autograd::functions::{ClampWithMask, LinearFunction, MulConstant};
use briny_autograd::gradcheck::{GradCheckConfig, check_gradients, gradcheck, gradgradcheck};
use briny_autograd::layers::{Layer, LinearConfig};
use briny_autograd::{Arg, Args, Context, Error, Function, Result, Ten64, Var};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random(rng: &mut StdRng, shape: &[usize]) -> Ten64 {
    let len = shape.iter().product();
    Ten64::new(shape.to_vec(), (0..len).map(|_| rng.random_range(-1.0..1.0)).collect())
}

fn apply_linear(xs: &[Var]) -> Result<Vec<Var>> {
    LinearFunction.apply(vec![
        Arg::from(&xs[0]),
        Arg::from(&xs[1]),
        Arg::from(xs.get(2)),
    ])
}

/// `x²` with a backward that is off by a factor.
#[derive(Debug, Clone, Copy)]
struct WrongSquare;

impl Function for WrongSquare {
    const NAME: &'static str = "WrongSquare";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let x = args.tensor(0)?;
        ctx.save_for_backward(&[x]);
        Ok(vec![Var::new(x.with_value(|v| v.mul(v))?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let saved = ctx.saved_tensors()?;
        Ok(vec![Some(grads[0].mul(&saved[0])?.scale(3.0)?)])
    }
}

/// `x²` whose backward computes on raw values, so it can't be differentiated again.
#[derive(Debug, Clone, Copy)]
struct OpaqueSquare;

impl Function for OpaqueSquare {
    const NAME: &'static str = "OpaqueSquare";
    type State = ();

    fn forward(&self, ctx: &mut Context<()>, args: &Args) -> Result<Vec<Var>> {
        let x = args.tensor(0)?;
        ctx.save_for_backward(&[x]);
        Ok(vec![Var::new(x.with_value(|v| v.mul(v))?)])
    }

    fn backward(&self, ctx: Context<()>, grads: &[Var]) -> Result<Vec<Option<Var>>> {
        let x = ctx.saved_tensors()?[0].value();
        let g = grads[0].value();
        Ok(vec![Some(Var::new(g.mul(&x)?.scale(2.0)))])
    }
}

#[test]
fn test_linear_scenario_passes() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let inputs = [
        Var::parameter(random(&mut rng, &[20, 20])),
        Var::parameter(random(&mut rng, &[30, 20])),
        Var::parameter(random(&mut rng, &[30])),
    ];
    let config = GradCheckConfig::default()
        .with_eps(1e-6)
        .with_atol(1e-4)
        .with_rtol(1e-4);
    assert!(gradcheck(apply_linear, &inputs, &config).unwrap());
}

#[test]
fn test_linear_without_bias_passes() {
    let mut rng = StdRng::seed_from_u64(7);
    let inputs = [
        Var::parameter(random(&mut rng, &[4, 3])),
        Var::parameter(random(&mut rng, &[2, 3])),
    ];
    let report = check_gradients(apply_linear, &inputs, &GradCheckConfig::default()).unwrap();
    assert!(report.passed());
    // 8 output elements against 12 + 6 input elements
    assert_eq!(report.checked, 8 * 18);
}

#[test]
fn test_gradcheck_is_idempotent_and_leaves_inputs_alone() {
    let mut rng = StdRng::seed_from_u64(11);
    let x = Var::parameter(random(&mut rng, &[3, 2]));
    let before = x.value();
    let func = |xs: &[Var]| -> Result<Vec<Var>> { Ok(vec![xs[0].exp()?.mul(&xs[0])?.sum()?]) };
    let config = GradCheckConfig::default();

    let first = check_gradients(func, &[x.clone()], &config).unwrap();
    let second = check_gradients(func, &[x.clone()], &config).unwrap();
    assert!(first.passed());
    assert_eq!(first, second);
    assert_eq!(x.value(), before);
    assert_eq!(x.version(), 0);
    assert!(x.grad().is_none());
}

#[test]
fn test_wrong_backward_is_reported() {
    let x = Var::parameter(Ten64::new(vec![2], vec![0.5, -1.5]));
    let report = check_gradients(
        |xs| WrongSquare.apply(vec![Arg::from(&xs[0])]),
        &[x],
        &GradCheckConfig::default(),
    )
    .unwrap();
    assert!(!report.passed());
    let diagonal: Vec<_> = report
        .mismatches
        .iter()
        .map(|m| (m.input_element, m.output_element))
        .collect();
    assert_eq!(diagonal, [(0, 0), (1, 1)]);
    assert!((report.mismatches[0].analytic - 1.5).abs() < 1e-9);
    assert!((report.mismatches[0].numeric - 1.0).abs() < 1e-4);
}

#[test]
fn test_errors_from_the_function_propagate() {
    let x = Var::parameter(Ten64::new(vec![2], vec![1.0, 2.0]));
    let result = gradcheck(
        |xs| MulConstant.apply(vec![Arg::from(&xs[0])]),
        &[x],
        &GradCheckConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_gradcheck_without_tracked_inputs_is_rejected() {
    let x = Var::new(Ten64::new(vec![2], vec![1.0, 2.0]));
    let result = gradcheck(
        |xs| MulConstant.apply(vec![Arg::from(&xs[0]), Arg::Scalar(3.0)]),
        &[x],
        &GradCheckConfig::default(),
    );
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_clamp_with_mask_passes_away_from_bounds() {
    let x = Var::parameter(Ten64::new(vec![4], vec![-0.7, 0.2, 0.9, 1.8]));
    let func = |xs: &[Var]| ClampWithMask.apply(vec![Arg::from(&xs[0]), Arg::Scalar(0.0), Arg::Scalar(1.0)]);
    assert!(gradcheck(func, &[x], &GradCheckConfig::default()).unwrap());
}

#[test]
fn test_layer_forward_passes() {
    let layer = LinearConfig::new(3, 2).init().unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let x = Var::parameter(random(&mut rng, &[5, 3]));
    let func = |xs: &[Var]| -> Result<Vec<Var>> { Ok(vec![layer.forward(&xs[0])?]) };
    assert!(gradcheck(func, &[x], &GradCheckConfig::default()).unwrap());
}

#[test]
fn test_gradgradcheck_composite() {
    let mut rng = StdRng::seed_from_u64(21);
    let a = Var::parameter(random(&mut rng, &[2, 3]));
    let b = Var::parameter(random(&mut rng, &[3, 2]));
    let func = |xs: &[Var]| -> Result<Vec<Var>> { Ok(vec![xs[0].matmul(&xs[1])?.exp()?, xs[0].mul(&xs[0])?]) };
    assert!(gradgradcheck(func, &[a, b], None, &GradCheckConfig::default()).unwrap());
}

#[test]
fn test_gradgradcheck_linear_with_explicit_seeds() {
    let mut rng = StdRng::seed_from_u64(5);
    let inputs = [
        Var::parameter(random(&mut rng, &[3, 4])),
        Var::parameter(random(&mut rng, &[2, 4])),
        Var::parameter(random(&mut rng, &[2])),
    ];
    let seeds = [Var::new(random(&mut rng, &[3, 2]))];
    assert!(gradgradcheck(apply_linear, &inputs, Some(&seeds[..]), &GradCheckConfig::default()).unwrap());
}

#[test]
fn test_gradgradcheck_catches_opaque_backward() {
    let x = Var::parameter(Ten64::new(vec![2], vec![0.5, 1.5]));
    let func = |xs: &[Var]| OpaqueSquare.apply(vec![Arg::from(&xs[0])]);

    assert!(gradcheck(func, &[x.clone()], &GradCheckConfig::default()).unwrap());
    assert!(!gradgradcheck(func, &[x], None, &GradCheckConfig::default()).unwrap());
}
