use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    BaseConfig, BaseRate, Config, DecayedLr, FromConfig, Optimizer, RateAccessor,
    optimizer::{check_shapes, from_map, non_negative, positive, to_map},
};
use crate::{
    backend::{self, DType, VarId, Variable},
    error::{OptimErr, Result},
};

fn default_beta_1() -> f32 {
    0.9
}

fn default_beta_2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-7
}

#[derive(Serialize, Deserialize)]
struct AdamConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default = "default_beta_1")]
    beta_1: f32,
    #[serde(default = "default_beta_2")]
    beta_2: f32,
    #[serde(default = "default_epsilon")]
    epsilon: f32,
    #[serde(default)]
    weight_decay: f32,
}

/// First and second moment estimates of a parameter.
#[derive(Debug, Clone)]
struct Moments {
    m: Variable,
    v: Variable,
}

/// Adam with optional decoupled weight decay.
#[derive(Debug, Clone)]
pub struct Adam {
    base: BaseConfig,
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
    weight_decay: f32,
    moments: HashMap<VarId, Moments>,
}

impl Adam {
    /// Creates a new `Adam` optimizer with the usual defaults for every other hyper-parameter.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            base: BaseConfig::new(learning_rate),
            beta_1: default_beta_1(),
            beta_2: default_beta_2(),
            epsilon: default_epsilon(),
            weight_decay: 0.,
            moments: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta_1: f32, beta_2: f32) -> Self {
        self.beta_1 = beta_1;
        self.beta_2 = beta_2;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Decay applied straight to the parameters, `p -= lr * weight_decay * p`, on every update.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Replaces the shared hyper-parameters and validates the whole optimizer.
    ///
    /// # Errors
    /// `OptimErr::InvalidConfig` if any hyper-parameter is out of its domain.
    pub fn with_base(mut self, base: BaseConfig) -> Result<Self> {
        self.base = base;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        self.base.validate()?;

        for (what, beta) in [("beta_1", self.beta_1), ("beta_2", self.beta_2)] {
            if !(0. ..1.).contains(&beta) {
                return Err(OptimErr::InvalidConfig(format!(
                    "{what} must be in [0, 1), got {beta}"
                )));
            }
        }

        positive("epsilon", self.epsilon)?;
        non_negative("weight_decay", self.weight_decay)
    }

    /// The first moment estimate of `param`, if it has been updated at least once.
    pub fn first_moment(&self, param: &Variable) -> Option<&Variable> {
        self.moments.get(&param.id()).map(|moments| &moments.m)
    }

    /// The second moment estimate of `param`, if it has been updated at least once.
    pub fn second_moment(&self, param: &Variable) -> Option<&Variable> {
        self.moments.get(&param.id()).map(|moments| &moments.v)
    }
}

impl Optimizer for Adam {
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
        to_map(&AdamConfig {
            base: self.base,
            beta_1: self.beta_1,
            beta_2: self.beta_2,
            epsilon: self.epsilon,
            weight_decay: self.weight_decay,
        })
    }
}

impl DecayedLr for Adam {
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

        let Self {
            beta_1: b1,
            beta_2: b2,
            epsilon: eps,
            weight_decay: wd,
            ..
        } = *self;

        let t = (self.base.iterations + 1) as f32;
        let bc1 = 1. - b1.powf(t);
        let bc2 = 1. - b2.powf(t);

        for (p, g) in params.iter_mut().zip(grads) {
            let g = self.base.clip(g);
            let lr = rate.rate(self.decayed_lr(p.dtype()), p.dtype());
            let step_size = lr * (bc2.sqrt() / bc1);

            let Moments { m, v } = self.moments.entry(p.id()).or_insert_with(|| Moments {
                m: Variable::zeros_like(format!("{}/m", p.name()), p),
                v: Variable::zeros_like(format!("{}/v", p.name()), p),
            });

            let new_m = m.values().iter().zip(&g).map(|(m, g)| b1 * m + (1. - b1) * g).collect();
            backend::update(m, new_m)?;

            let new_v = v
                .values()
                .iter()
                .zip(&g)
                .map(|(v, g)| b2 * v + (1. - b2) * g.powi(2))
                .collect();
            backend::update(v, new_v)?;

            let new_p = p
                .values()
                .iter()
                .zip(m.values().iter().zip(v.values()))
                .map(|(w, (m, v))| w - step_size * m / (v.sqrt() + eps) - lr * wd * w)
                .collect();
            backend::update(p, new_p)?;
        }

        self.base.iterations += 1;
        Ok(())
    }
}

impl FromConfig for Adam {
    const NAME: &'static str = "Adam";

    fn from_config(config: &Config) -> Result<Self> {
        let AdamConfig {
            base,
            beta_1,
            beta_2,
            epsilon,
            weight_decay,
        } = from_map(config)?;

        Adam::new(base.learning_rate)
            .with_betas(beta_1, beta_2)
            .with_epsilon(epsilon)
            .with_weight_decay(weight_decay)
            .with_base(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_about_the_learning_rate() {
        let mut opt = Adam::new(0.1);
        let mut params = [Variable::new("w", vec![1., -1.])];

        opt.apply_gradients(&mut params, &[&[3., -0.5]]).unwrap();

        // m_hat / sqrt(v_hat) == sign(g) on the first step.
        let w = params[0].values();
        assert!((w[0] - 0.9).abs() < 1e-5, "{w:?}");
        assert!((w[1] + 0.9).abs() < 1e-5, "{w:?}");
        assert!(opt.first_moment(&params[0]).is_some());
        assert!(opt.second_moment(&params[0]).is_some());
    }

    #[test]
    fn weight_decay_shrinks_parameters_without_gradient() {
        let mut opt = Adam::new(0.1).with_weight_decay(0.5);
        let mut params = [Variable::new("w", vec![2.])];

        opt.apply_gradients(&mut params, &[&[0.]]).unwrap();

        assert!((params[0].values()[0] - 1.9).abs() < 1e-6);
    }

    #[test]
    fn invalid_betas_are_rejected() {
        let config = Adam::new(0.1).with_betas(1., 0.999).config();
        assert!(matches!(
            Adam::from_config(&config),
            Err(OptimErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_round_trip() {
        let opt = Adam::new(0.01)
            .with_betas(0.8, 0.99)
            .with_weight_decay(0.01)
            .with_base(BaseConfig::new(0.01).with_clipnorm(1.))
            .unwrap();

        let rebuilt = Adam::from_config(&opt.config()).unwrap();
        assert_eq!(rebuilt.config(), opt.config());
    }
}
