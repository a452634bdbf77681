use briny_autograd::layers::{Layer, Linear, LinearConfig, Scale, Slot, sgd};
use briny_autograd::modelio::{load_state, load_state_file, save_state, save_state_file};
use briny_autograd::{Error, Var, tensor};

#[test]
fn test_parameter_count_is_independent_of_bias() {
    let with_bias = LinearConfig::new(3, 2).init().unwrap();
    let without = LinearConfig::new(3, 2).with_bias(false).init().unwrap();

    assert_eq!(with_bias.num_parameters(), 2);
    assert_eq!(without.num_parameters(), 2);
    assert_eq!(with_bias.registry().num_elements(), 8);
    assert_eq!(without.registry().num_elements(), 6);

    let named = without.named_parameters();
    assert_eq!(named[0].0, "weight");
    assert!(named[0].1.is_present());
    assert_eq!(named[1].0, "bias");
    assert!(matches!(named[1].1, Slot::Absent));
    assert!(without.bias().is_none());
    assert_eq!(without.parameters().len(), 1);
}

#[test]
fn test_linear_forward_and_backward() {
    let layer = Linear::from_tensors(
        tensor!([[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]),
        Some(tensor!([0.5, 0.5, 0.5])),
    )
    .unwrap();
    let x = Var::new(tensor!([[1.0, 2.0]]));
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.value().data, vec![1.5, 2.5, 3.5]);

    y.sum().unwrap().backward().unwrap();
    assert_eq!(layer.weight().grad().unwrap().value().data, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    assert_eq!(layer.bias().unwrap().grad().unwrap().value().data, vec![1.0, 1.0, 1.0]);
}

#[test]
fn test_describe_reports_configuration() {
    let layer = LinearConfig::new(20, 30).init().unwrap();
    assert_eq!(layer.describe(), "in_features=20, out_features=30, bias=true");
    assert_eq!(layer.to_string(), "Linear(in_features=20, out_features=30, bias=true)");
}

#[test]
fn test_sgd_steps_and_clears_gradients() {
    let layer = Linear::from_tensors(tensor!([[1.0, 1.0]]), None).unwrap();
    let x = Var::new(tensor!([[2.0, 3.0]]));
    layer.forward(&x).unwrap().backward().unwrap();

    sgd(&layer, 0.1);
    let w = layer.weight().value().data;
    assert!((w[0] - 0.8).abs() < 1e-12);
    assert!((w[1] - 0.7).abs() < 1e-12);
    assert!(layer.weight().grad().is_none());
}

#[test]
fn test_scale_layer_keeps_factor_in_a_buffer() {
    let layer = Scale::new(0.5).unwrap();
    assert_eq!(layer.num_parameters(), 0);
    assert_eq!(layer.registry().named_buffers().len(), 1);

    let x = Var::parameter(tensor!([2.0, 4.0]));
    layer.forward(&x).unwrap().sum().unwrap().backward().unwrap();
    assert_eq!(x.grad().unwrap().value().data, vec![0.5, 0.5]);
}

#[test]
fn test_state_round_trip_through_memory() {
    let source = LinearConfig::new(4, 3).init().unwrap();
    source.weight().update_(|w| {
        for (i, v) in w.iter_mut().enumerate() {
            *v = i as f64;
        }
    });
    let target = LinearConfig::new(4, 3).init().unwrap();
    let held = target.weight().clone();

    let mut bytes = Vec::new();
    save_state(&mut bytes, source.registry()).unwrap();
    load_state(&mut bytes.as_slice(), target.registry()).unwrap();

    assert_eq!(held.value(), source.weight().value());
    assert_eq!(target.bias().unwrap().value(), source.bias().unwrap().value());
}

#[test]
fn test_state_round_trip_through_file() {
    let path = std::env::temp_dir().join(format!("briny_autograd_state_{}.bpst", std::process::id()));
    let source = LinearConfig::new(2, 2).with_bias(false).init().unwrap();
    let target = Linear::from_tensors(tensor!([[0.0, 0.0], [0.0, 0.0]]), None).unwrap();

    save_state_file(&path, source.registry()).unwrap();
    load_state_file(&path, target.registry()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(target.weight().value(), source.weight().value());
}

#[test]
fn test_state_with_absent_bias_does_not_load_into_biased_layer() {
    let source = LinearConfig::new(2, 2).with_bias(false).init().unwrap();
    let target = LinearConfig::new(2, 2).init().unwrap();
    let mut bytes = Vec::new();
    save_state(&mut bytes, source.registry()).unwrap();
    let err = load_state(&mut bytes.as_slice(), target.registry()).unwrap_err();
    assert!(matches!(err, Error::Record(_)));
}

#[test]
fn test_linear_config_serde() {
    let config = LinearConfig::new(20, 30).with_bias(false);
    let json = serde_json::to_string(&config).unwrap();
    let back: LinearConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);

    let defaulted: LinearConfig = serde_json::from_str(r#"{"in_features":2,"out_features":3}"#).unwrap();
    assert!(defaulted.bias);
}
