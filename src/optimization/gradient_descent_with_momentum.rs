use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    BaseConfig, BaseRate, Config, DecayedLr, FromConfig, Optimizer, RateAccessor,
    optimizer::{check_shapes, from_map, non_negative, to_map},
};
use crate::{
    backend::{self, DType, VarId, Variable},
    error::Result,
};

fn default_momentum() -> f32 {
    0.9
}

#[derive(Serialize, Deserialize)]
struct GradientDescentWithMomentumConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default = "default_momentum")]
    momentum: f32,
}

/// Gradient descent with a velocity accumulator per parameter.
#[derive(Debug, Clone)]
pub struct GradientDescentWithMomentum {
    base: BaseConfig,
    momentum: f32,
    velocity: HashMap<VarId, Variable>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            base: BaseConfig::new(learning_rate),
            momentum,
            velocity: HashMap::new(),
        }
    }

    /// # Errors
    /// `OptimErr::InvalidConfig` if `base` doesn't validate or `momentum` is negative.
    pub fn from_base(base: BaseConfig, momentum: f32) -> Result<Self> {
        base.validate()?;
        non_negative("momentum", momentum)?;

        Ok(Self {
            base,
            momentum,
            velocity: HashMap::new(),
        })
    }

    /// The velocity slot of `param`, if it has been updated at least once.
    pub fn velocity(&self, param: &Variable) -> Option<&Variable> {
        self.velocity.get(&param.id())
    }
}

impl Optimizer for GradientDescentWithMomentum {
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
        to_map(&GradientDescentWithMomentumConfig {
            base: self.base,
            momentum: self.momentum,
        })
    }
}

impl DecayedLr for GradientDescentWithMomentum {
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

        let mu = self.momentum;

        for (p, g) in params.iter_mut().zip(grads) {
            let g = self.base.clip(g);
            let lr = rate.rate(self.decayed_lr(p.dtype()), p.dtype());

            let v = self
                .velocity
                .entry(p.id())
                .or_insert_with(|| Variable::zeros_like(format!("{}/velocity", p.name()), p));

            let new_v = v.values().iter().zip(&g).map(|(v, g)| mu * v + g).collect();
            backend::update(v, new_v)?;

            let new_p = p
                .values()
                .iter()
                .zip(v.values())
                .map(|(w, v)| w - lr * v)
                .collect();
            backend::update(p, new_p)?;
        }

        self.base.iterations += 1;
        Ok(())
    }
}

impl FromConfig for GradientDescentWithMomentum {
    const NAME: &'static str = "GradientDescentWithMomentum";

    fn from_config(config: &Config) -> Result<Self> {
        let GradientDescentWithMomentumConfig { base, momentum } = from_map(config)?;
        Self::from_base(base, momentum)
    }
}
