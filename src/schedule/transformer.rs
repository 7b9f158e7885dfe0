use serde::{Deserialize, Serialize};

use crate::error::{OptimErr, Result};

const DEFAULT_START_STEP: u64 = 0;
const DEFAULT_WARMUP_STEPS: f64 = 4000.;
const DEFAULT_MODEL_DIMENSION: f64 = 512.;

/// The learning rate multiplier of "Attention Is All You Need" at a given step.
///
/// `1 / sqrt(model_dimension) * min(1 / sqrt(step), step * warmup_steps^-1.5)`
///
/// Linear warmup until `step = warmup_steps`, where both arms are equal, inverse square root
/// decay after it. `step` must be at least 1, the result is meaningless otherwise.
///
/// # Arguments
/// * `step` - The effective step.
/// * `warmup_steps` - The length of the warmup.
/// * `model_dimension` - The model's hidden size.
pub fn transformer_schedule(step: f64, warmup_steps: f64, model_dimension: f64) -> f64 {
    let arg1 = 1. / step.sqrt();
    let arg2 = step * warmup_steps.powf(-1.5);
    1. / model_dimension.sqrt() * arg1.min(arg2)
}

#[derive(Serialize, Deserialize)]
struct RawSchedule {
    #[serde(default)]
    start_step: u64,
    #[serde(default = "default_warmup_steps")]
    warmup_steps: f64,
    #[serde(default = "default_model_dimension")]
    model_dimension: f64,
}

fn default_warmup_steps() -> f64 {
    DEFAULT_WARMUP_STEPS
}

fn default_model_dimension() -> f64 {
    DEFAULT_MODEL_DIMENSION
}

impl TryFrom<RawSchedule> for TransformerSchedule {
    type Error = OptimErr;

    fn try_from(raw: RawSchedule) -> Result<Self> {
        TransformerSchedule::new(raw.start_step, raw.warmup_steps, raw.model_dimension)
    }
}

impl From<TransformerSchedule> for RawSchedule {
    fn from(schedule: TransformerSchedule) -> Self {
        Self {
            start_step: schedule.start_step,
            warmup_steps: schedule.warmup_steps,
            model_dimension: schedule.model_dimension,
        }
    }
}

/// Immutable parameters of the transformer learning rate schedule.
///
/// Always valid: both constructors and deserialization reject non positive `warmup_steps` and
/// `model_dimension`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchedule", into = "RawSchedule")]
pub struct TransformerSchedule {
    start_step: u64,
    warmup_steps: f64,
    model_dimension: f64,
}

impl Default for TransformerSchedule {
    fn default() -> Self {
        Self {
            start_step: DEFAULT_START_STEP,
            warmup_steps: DEFAULT_WARMUP_STEPS,
            model_dimension: DEFAULT_MODEL_DIMENSION,
        }
    }
}

impl TransformerSchedule {
    /// Creates a new `TransformerSchedule`.
    ///
    /// # Arguments
    /// * `start_step` - Offset added to the optimizer's iteration counter.
    /// * `warmup_steps` - The length of the warmup.
    /// * `model_dimension` - The model's hidden size.
    ///
    /// # Errors
    /// `OptimErr::InvalidConfig` if `warmup_steps` or `model_dimension` is not a finite number
    /// greater than 0.
    pub fn new(start_step: u64, warmup_steps: f64, model_dimension: f64) -> Result<Self> {
        for (what, value) in [
            ("warmup_steps", warmup_steps),
            ("model_dimension", model_dimension),
        ] {
            if !value.is_finite() || value <= 0. {
                return Err(OptimErr::InvalidConfig(format!(
                    "{what} must be a finite number greater than 0, got {value}"
                )));
            }
        }

        Ok(Self {
            start_step,
            warmup_steps,
            model_dimension,
        })
    }

    pub fn start_step(&self) -> u64 {
        self.start_step
    }

    pub fn warmup_steps(&self) -> f64 {
        self.warmup_steps
    }

    pub fn model_dimension(&self) -> f64 {
        self.model_dimension
    }

    /// The effective step at which both arms meet and the multiplier peaks.
    pub fn peak_step(&self) -> f64 {
        self.warmup_steps
    }

    /// The largest multiplier this schedule yields, `1 / sqrt(model_dimension * warmup_steps)`.
    pub fn peak_multiplier(&self) -> f64 {
        transformer_schedule(self.peak_step(), self.warmup_steps, self.model_dimension)
    }

    /// The effective step for a given iteration count, never below 1.
    pub fn effective_step(&self, iterations: u64) -> u64 {
        iterations.saturating_add(self.start_step).max(1)
    }

    /// The learning rate multiplier after `iterations` updates.
    ///
    /// # Arguments
    /// * `iterations` - The optimizer's iteration counter.
    ///
    /// # Returns
    /// A multiplier in `(0, 1 / sqrt(model_dimension)]`.
    pub fn multiplier(&self, iterations: u64) -> f32 {
        let step = self.effective_step(iterations) as f64;
        transformer_schedule(step, self.warmup_steps, self.model_dimension) as f32
    }
}
