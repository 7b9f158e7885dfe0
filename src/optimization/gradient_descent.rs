use serde::{Deserialize, Serialize};

use super::{
    BaseConfig, BaseRate, Config, DecayedLr, FromConfig, Optimizer, RateAccessor,
    optimizer::{check_shapes, from_map, to_map},
};
use crate::{
    backend::{self, DType, Variable},
    error::Result,
};

#[derive(Serialize, Deserialize)]
struct GradientDescentConfig {
    #[serde(flatten)]
    base: BaseConfig,
}

/// Gradient descent optimization algorithm.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    base: BaseConfig,
}

impl GradientDescent {
    /// Creates a new `GradientDescent` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `GradientDescent` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            base: BaseConfig::new(learning_rate),
        }
    }

    /// Creates a new `GradientDescent` optimizer with decay, clipping or a resumed iteration count.
    ///
    /// # Errors
    /// `OptimErr::InvalidConfig` if `base` doesn't validate.
    pub fn from_base(base: BaseConfig) -> Result<Self> {
        base.validate()?;
        Ok(Self { base })
    }
}

impl Optimizer for GradientDescent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn iterations(&self) -> u64 {
        self.base.iterations
    }

    fn apply_gradients(&mut self, params: &mut [Variable], grads: &[&[f32]]) -> Result<()> {
        self.apply_gradients_with(params, grads, &BaseRate)
    }

    fn config(&self) -> Config {
        to_map(&GradientDescentConfig { base: self.base })
    }
}

impl DecayedLr for GradientDescent {
    fn decayed_lr(&self, dtype: DType) -> f32 {
        self.base.decayed_lr(dtype)
    }

    fn apply_gradients_with(
        &mut self,
        params: &mut [Variable],
        grads: &[&[f32]],
        rate: &dyn RateAccessor,
    ) -> Result<()> {
        check_shapes(params, grads)?;

        for (p, g) in params.iter_mut().zip(grads) {
            let g = self.base.clip(g);
            let lr = rate.rate(self.decayed_lr(p.dtype()), p.dtype());

            let new_p = p.values().iter().zip(&g).map(|(w, g)| w - lr * g).collect();
            backend::update(p, new_p)?;
        }

        self.base.iterations += 1;
        Ok(())
    }
}

impl FromConfig for GradientDescent {
    const NAME: &'static str = "GradientDescent";

    fn from_config(config: &Config) -> Result<Self> {
        let GradientDescentConfig { base } = from_map(config)?;
        Self::from_base(base)
    }
}
