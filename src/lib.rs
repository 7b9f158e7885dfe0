//! Transformer learning rate schedule for gradient-descent optimizers.
//!
//! `Scheduled` wraps a base optimizer and scales every parameter update by
//! `1 / sqrt(model_dimension) * min(1 / sqrt(step), step * warmup_steps^-1.5)`, leaving the rest
//! of the base optimizer's behaviour untouched. The multiplier is injected either by intercepting
//! the base optimizer's assignments (`Intercept`) or by overriding its learning rate accessor
//! (`RateOverride`).

pub mod backend;
pub mod error;
pub mod optimization;
pub mod registry;
pub mod schedule;

pub use error::{OptimErr, Result};
pub use optimization::{DecayedLr, FromConfig, Optimizer};
pub use registry::{
    SerializedOptimizer, deserialize, extend_with_transformer_schedule,
    extend_with_transformer_schedule_v2, serialize,
};
pub use schedule::{Intercept, RateOverride, Scheduled, TransformerSchedule};
