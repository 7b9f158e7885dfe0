use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    backend::{DType, Variable},
    error::{OptimErr, Result},
};

/// The framework-facing configuration mapping of an optimizer.
pub type Config = serde_json::Map<String, Value>;

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// The name this optimizer is registered under.
    fn name(&self) -> &str;

    /// The amount of successful `apply_gradients` calls so far.
    fn iterations(&self) -> u64;

    /// Applies one batched update to `params`.
    ///
    /// Every write, to the parameters and to the optimizer's own slots, goes through
    /// `backend::update`.
    ///
    /// # Arguments
    /// * `params` - The trainable variables to update.
    /// * `grads` - One gradient per variable, in the same order.
    ///
    /// # Errors
    /// `OptimErr::SizeMismatch` if the amount or length of the gradients doesn't match `params`.
    fn apply_gradients(&mut self, params: &mut [Variable], grads: &[&[f32]]) -> Result<()>;

    /// Returns the configuration needed to rebuild this optimizer, iteration counter included.
    fn config(&self) -> Config;
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn iterations(&self) -> u64 {
        (**self).iterations()
    }

    fn apply_gradients(&mut self, params: &mut [Variable], grads: &[&[f32]]) -> Result<()> {
        (**self).apply_gradients(params, grads)
    }

    fn config(&self) -> Config {
        (**self).config()
    }
}

/// Turns the decayed learning rate of a variable into the step size actually used.
pub trait RateAccessor {
    /// # Arguments
    /// * `decayed_lr` - The optimizer's own learning rate for this step, rounded to `dtype`.
    /// * `dtype` - The precision of the variable being updated.
    fn rate(&self, decayed_lr: f32, dtype: DType) -> f32;
}

/// The identity `RateAccessor`.
#[derive(Debug, Clone, Copy)]
pub struct BaseRate;

impl RateAccessor for BaseRate {
    fn rate(&self, decayed_lr: f32, _dtype: DType) -> f32 {
        decayed_lr
    }
}

/// An optimizer that reads its per-variable step size through a single accessor.
pub trait DecayedLr: Optimizer {
    /// The learning rate for a variable stored with `dtype` at the current iteration.
    fn decayed_lr(&self, dtype: DType) -> f32;

    /// Same as `Optimizer::apply_gradients`, but every step size is
    /// `rate.rate(self.decayed_lr(dtype), dtype)`.
    fn apply_gradients_with(
        &mut self,
        params: &mut [Variable],
        grads: &[&[f32]],
        rate: &dyn RateAccessor,
    ) -> Result<()>;
}

/// An optimizer that can be rebuilt from its `Optimizer::config`.
pub trait FromConfig: Optimizer + Sized {
    /// The default registration name.
    const NAME: &'static str;

    /// # Errors
    /// `OptimErr::Serde` if `config` is malformed, `OptimErr::InvalidConfig` if any value is out of
    /// its domain.
    fn from_config(config: &Config) -> Result<Self>;
}

/// Hyper-parameters and state every base optimizer shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    pub learning_rate: f32,
    /// Inverse time decay of the learning rate per iteration.
    #[serde(default)]
    pub decay: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clipnorm: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clipvalue: Option<f32>,
    #[serde(default)]
    pub iterations: u64,
}

impl BaseConfig {
    /// Creates a new `BaseConfig` with no decay and no clipping.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            decay: 0.,
            clipnorm: None,
            clipvalue: None,
            iterations: 0,
        }
    }

    pub fn with_decay(mut self, decay: f32) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_clipnorm(mut self, clipnorm: f32) -> Self {
        self.clipnorm = Some(clipnorm);
        self
    }

    pub fn with_clipvalue(mut self, clipvalue: f32) -> Self {
        self.clipvalue = Some(clipvalue);
        self
    }

    /// Checks every hyper-parameter is inside its domain.
    pub fn validate(&self) -> Result<()> {
        non_negative("learning_rate", self.learning_rate)?;
        non_negative("decay", self.decay)?;

        if let Some(clipnorm) = self.clipnorm {
            positive("clipnorm", clipnorm)?;
        }

        if let Some(clipvalue) = self.clipvalue {
            positive("clipvalue", clipvalue)?;
        }

        Ok(())
    }

    /// `learning_rate / (1 + decay * iterations)`, rounded to `dtype`.
    pub fn decayed_lr(&self, dtype: DType) -> f32 {
        let lr = self.learning_rate / (1. + self.decay * self.iterations as f32);
        dtype.round(lr)
    }

    /// Returns `grad` after applying the configured clipping, norm first.
    pub fn clip(&self, grad: &[f32]) -> Vec<f32> {
        let mut grad = grad.to_vec();

        if let Some(clipnorm) = self.clipnorm {
            let norm = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
            if norm > clipnorm {
                let coef = clipnorm / norm;
                grad.iter_mut().for_each(|g| *g *= coef);
            }
        }

        if let Some(clipvalue) = self.clipvalue {
            grad.iter_mut()
                .for_each(|g| *g = g.clamp(-clipvalue, clipvalue));
        }

        grad
    }
}

/// Fails unless there's exactly one gradient per parameter and each one has the same length.
pub(crate) fn check_shapes(params: &[Variable], grads: &[&[f32]]) -> Result<()> {
    if params.len() != grads.len() {
        return Err(OptimErr::SizeMismatch {
            what: "gradients",
            got: grads.len(),
            expected: params.len(),
        });
    }

    for (p, g) in params.iter().zip(grads) {
        if p.len() != g.len() {
            return Err(OptimErr::SizeMismatch {
                what: "gradient",
                got: g.len(),
                expected: p.len(),
            });
        }
    }

    Ok(())
}

pub(crate) fn positive(what: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value <= 0. {
        return Err(OptimErr::InvalidConfig(format!(
            "{what} must be a finite number greater than 0, got {value}"
        )));
    }

    Ok(())
}

pub(crate) fn non_negative(what: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value < 0. {
        return Err(OptimErr::InvalidConfig(format!(
            "{what} must be a finite non negative number, got {value}"
        )));
    }

    Ok(())
}

/// Serializes a config struct into a `Config` mapping.
pub(crate) fn to_map<T: Serialize>(value: &T) -> Config {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Config::new(),
    }
}

/// Deserializes a config struct from a `Config` mapping, unknown keys are ignored.
pub(crate) fn from_map<T: DeserializeOwned>(config: &Config) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(config.clone()))?)
}
