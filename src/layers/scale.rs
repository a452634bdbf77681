use super::{Layer, Registry};
use crate::error::{Error, Result};
use crate::function::{Arg, Function};
use crate::functions::MulConstant;
use crate::tensors::Ten64;
use crate::var::Var;

/// Multiplies its input by a fixed factor kept in the `factor` buffer.
#[derive(Debug, Clone)]
pub struct Scale {
    registry: Registry,
}

impl Scale {
    /// A layer scaling by `factor`.
    ///
    /// # Errors
    /// Never fails in practice; registration errors are propagated.
    pub fn new(factor: f64) -> Result<Self> {
        let mut registry = Registry::new();
        registry.register_buffer("factor", Some(Ten64::scalar(factor)))?;
        Ok(Self { registry })
    }

    /// The current factor.
    ///
    /// # Errors
    /// [`Error::UnknownName`] if the buffer was cleared.
    pub fn factor(&self) -> Result<f64> {
        self.registry
            .buffer("factor")?
            .and_then(|factor| factor.item())
            .ok_or_else(|| Error::UnknownName("factor".to_owned()))
    }

    /// Replaces the factor.
    ///
    /// # Errors
    /// Propagates registry errors.
    pub fn set_factor(&mut self, factor: f64) -> Result<()> {
        self.registry.set_buffer("factor", Some(Ten64::scalar(factor)))
    }
}

impl Layer for Scale {
    type Input = Var;
    type Output = Var;

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    fn forward(&self, input: &Var) -> Result<Var> {
        MulConstant.apply_single(vec![Arg::from(input), Arg::Scalar(self.factor()?)])
    }

    fn describe(&self) -> String {
        match self.factor() {
            Ok(factor) => format!("factor={factor}"),
            Err(_) => "factor=absent".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn forward_uses_the_buffer() {
        let mut layer = Scale::new(2.0).unwrap();
        let x = Var::parameter(tensor!([1.0, 2.0]));
        assert_eq!(layer.forward(&x).unwrap().value().data, vec![2.0, 4.0]);

        layer.set_factor(3.0).unwrap();
        assert_eq!(layer.describe(), "factor=3");
        assert_eq!(layer.num_parameters(), 0);
        assert_eq!(layer.forward(&x).unwrap().value().data, vec![3.0, 6.0]);
    }
}
