use log::debug;
use serde_json::Value;

use super::{
    TransformerSchedule,
    scaler::{Chained, Intercept, RateOverride, ScaledRate, UpdateScaler},
};
use crate::{
    backend::{DType, Variable},
    error::Result,
    optimization::{
        Config, DecayedLr, FromConfig, Optimizer, RateAccessor,
        optimizer::{from_map, to_map},
    },
};

const SCHEDULE_KEY: &str = "lr_schedule";
const NAME_KEY: &str = "name";

/// A base optimizer whose every update is scaled by a `TransformerSchedule` multiplier.
///
/// The multiplier is computed from the base optimizer's iteration counter right before each
/// update, everything else (slots, clipping, decay, the counter itself) stays with the base.
#[derive(Debug, Clone)]
pub struct Scheduled<O, S = Intercept> {
    base: O,
    schedule: TransformerSchedule,
    scaler: S,
    name: String,
}

impl<O, S> Scheduled<O, S>
where
    O: Optimizer,
    S: UpdateScaler<O>,
{
    /// Creates a new `Scheduled` optimizer named after `base` and the scaling strategy.
    ///
    /// # Arguments
    /// * `base` - The optimizer doing the actual update.
    /// * `schedule` - The schedule producing the multiplier.
    /// * `scaler` - How the multiplier is injected into `base`'s update.
    pub fn new(base: O, schedule: TransformerSchedule, scaler: S) -> Self {
        let name = format!("{}{}", base.name(), S::SUFFIX);

        Self {
            base,
            schedule,
            scaler,
            name,
        }
    }

    /// Overrides the name the optimizer is serialized with.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn base(&self) -> &O {
        &self.base
    }

    pub fn schedule(&self) -> &TransformerSchedule {
        &self.schedule
    }

    pub fn into_inner(self) -> O {
        self.base
    }

    /// The multiplier the next update will be scaled with.
    pub fn multiplier(&self) -> f32 {
        self.schedule.multiplier(self.base.iterations())
    }
}

impl<O, S> Scheduled<O, S>
where
    O: FromConfig,
    S: UpdateScaler<O> + Default,
{
    /// Rebuilds a scheduled optimizer from its `Optimizer::config`.
    ///
    /// A missing `lr_schedule` entry falls back to the default schedule, a missing `name` to the
    /// default name.
    ///
    /// # Errors
    /// Whatever the base optimizer's `FromConfig` fails with, or an error if the schedule entry is
    /// malformed or out of its domain.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut config = config.clone();

        let schedule = match config.remove(SCHEDULE_KEY) {
            Some(Value::Object(schedule)) => from_map(&schedule)?,
            Some(other) => serde_json::from_value(other)?,
            None => TransformerSchedule::default(),
        };

        let name = match config.remove(NAME_KEY) {
            Some(Value::String(name)) => Some(name),
            _ => None,
        };

        let base = O::from_config(&config)?;
        let scheduled = Self::new(base, schedule, S::default());

        Ok(match name {
            Some(name) => scheduled.with_name(name),
            None => scheduled,
        })
    }
}

impl<O: Optimizer> Scheduled<O, Intercept> {
    /// Scales `base` by intercepting its parameter assignments.
    pub fn intercepting(base: O, schedule: TransformerSchedule) -> Self {
        Self::new(base, schedule, Intercept)
    }
}

impl<O: DecayedLr> Scheduled<O, RateOverride> {
    /// Scales `base` by overriding its learning rate accessor.
    pub fn overriding_rate(base: O, schedule: TransformerSchedule) -> Self {
        Self::new(base, schedule, RateOverride)
    }
}

impl<O, S> Optimizer for Scheduled<O, S>
where
    O: Optimizer,
    S: UpdateScaler<O>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn iterations(&self) -> u64 {
        self.base.iterations()
    }

    fn apply_gradients(&mut self, params: &mut [Variable], grads: &[&[f32]]) -> Result<()> {
        let iterations = self.base.iterations();
        let multiplier = self.schedule.multiplier(iterations);

        debug!(
            step = self.schedule.effective_step(iterations),
            multiplier = multiplier;
            "scaling update"
        );

        self.scaler
            .scaled_step(&mut self.base, params, grads, multiplier)
    }

    /// The base optimizer's config followed by the `name` and `lr_schedule` entries.
    fn config(&self) -> Config {
        let mut config = self.base.config();
        config.insert(NAME_KEY.into(), Value::String(self.name.clone()));
        config.insert(SCHEDULE_KEY.into(), Value::Object(to_map(&self.schedule)));
        config
    }
}

impl<O: DecayedLr> DecayedLr for Scheduled<O, RateOverride> {
    fn decayed_lr(&self, dtype: DType) -> f32 {
        let rate = ScaledRate {
            multiplier: self.multiplier(),
        };

        rate.rate(self.base.decayed_lr(dtype), dtype)
    }

    fn apply_gradients_with(
        &mut self,
        params: &mut [Variable],
        grads: &[&[f32]],
        rate: &dyn RateAccessor,
    ) -> Result<()> {
        let rate = Chained {
            first: ScaledRate {
                multiplier: self.multiplier(),
            },
            then: rate,
        };

        self.base.apply_gradients_with(params, grads, &rate)
    }
}
