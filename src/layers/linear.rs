use super::{Layer, Registry};
use crate::error::{Error, Result};
use crate::function::{Arg, Function};
use crate::functions::LinearFunction;
use crate::tensors::Ten64;
use crate::var::Var;
use core::fmt;
use serde::{Deserialize, Serialize};

const fn default_bias() -> bool {
    true
}

/// Configuration to create a [`Linear`] layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearConfig {
    /// The size of the input features.
    pub in_features: usize,
    /// The size of the output features.
    pub out_features: usize,
    /// If a bias should be applied during the linear transformation.
    #[serde(default = "default_bias")]
    pub bias: bool,
}

impl LinearConfig {
    /// A configuration with a bias.
    #[must_use]
    pub const fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
            bias: true,
        }
    }

    /// Sets whether the layer has a bias.
    #[must_use]
    pub const fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    /// Initializes a new [`Linear`] layer.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if either dimension is zero.
    pub fn init(&self) -> Result<Linear> {
        Linear::new(self)
    }
}

/// Applies `input · weightᵀ + bias` to `[n, in_features]` inputs.
///
/// Registers `weight` (`[out_features, in_features]`) and `bias`
/// (`[out_features]`); `bias` is registered as absent when disabled.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    registry: Registry,
    weight: Var,
    bias: Option<Var>,
}

impl Linear {
    /// Creates a layer with a deterministic weight pattern bounded by
    /// `1 / sqrt(in_features)` and a zero bias.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if either dimension is zero.
    pub fn new(config: &LinearConfig) -> Result<Self> {
        if config.in_features == 0 || config.out_features == 0 {
            return Err(Error::InvalidConfig(format!(
                "linear layer needs non-zero dimensions, got {}x{}",
                config.out_features, config.in_features
            )));
        }

        let bound = 1.0 / (config.in_features as f64).sqrt();
        let numel = config.out_features * config.in_features;
        let weight = Ten64::new(
            vec![config.out_features, config.in_features],
            (0..numel).map(|i| bound * ((i + 1) as f64 * 0.7).sin()).collect(),
        );
        let bias = config.bias.then(|| Ten64::zeros(vec![config.out_features]));

        Self::build(*config, weight, bias)
    }

    /// Creates a layer around existing tensors.
    ///
    /// # Errors
    /// [`Error::Rank`] unless `weight` is a matrix,
    /// [`Error::ShapeMismatch`] if `bias` doesn't have `out_features` elements.
    pub fn from_tensors(weight: Ten64, bias: Option<Ten64>) -> Result<Self> {
        let &[out_features, in_features] = weight.shape.as_slice() else {
            return Err(Error::Rank {
                op: "Linear",
                expected: 2,
                shape: weight.shape,
            });
        };
        if let Some(bias) = &bias {
            if bias.shape != [out_features] {
                return Err(Error::ShapeMismatch {
                    op: "Linear",
                    lhs: vec![out_features],
                    rhs: bias.shape.clone(),
                });
            }
        }
        let config = LinearConfig::new(in_features, out_features).with_bias(bias.is_some());
        Self::build(config, weight, bias)
    }

    fn build(config: LinearConfig, weight: Ten64, bias: Option<Ten64>) -> Result<Self> {
        let mut registry = Registry::new();
        let weight = registry
            .register_parameter("weight", Some(weight))?
            .ok_or_else(|| Error::UnknownName("weight".to_owned()))?;
        let bias = registry.register_parameter("bias", bias)?;
        Ok(Self {
            config,
            registry,
            weight,
            bias,
        })
    }

    /// The weight parameter.
    #[must_use]
    pub const fn weight(&self) -> &Var {
        &self.weight
    }

    /// The bias parameter, if the layer has one.
    #[must_use]
    pub const fn bias(&self) -> Option<&Var> {
        self.bias.as_ref()
    }

    /// The configuration the layer was built from.
    #[must_use]
    pub const fn config(&self) -> &LinearConfig {
        &self.config
    }
}

impl Layer for Linear {
    type Input = Var;
    type Output = Var;

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    fn forward(&self, input: &Var) -> Result<Var> {
        LinearFunction.apply_single(vec![
            Arg::from(input),
            Arg::from(&self.weight),
            Arg::from(self.bias.as_ref()),
        ])
    }

    fn describe(&self) -> String {
        format!(
            "in_features={}, out_features={}, bias={}",
            self.config.in_features, self.config.out_features, self.config.bias
        )
    }
}

impl fmt::Display for Linear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Linear({})", self.describe())
    }
}
