use std::collections::HashSet;

use crate::{
    backend::{self, AssignHook, DType, VarId, Variable},
    error::Result,
    optimization::{DecayedLr, Optimizer, RateAccessor},
};

/// Applies a learning rate multiplier to a single update of a base optimizer.
///
/// Which implementation fits depends on the integration point the base optimizer offers, and it
/// is picked at compile time through the `O` bound.
pub trait UpdateScaler<O: ?Sized> {
    /// Appended to the base optimizer's name to build the default name of the scheduled one.
    const SUFFIX: &'static str;

    /// Runs one update of `base` with every parameter step scaled by `multiplier`.
    ///
    /// # Errors
    /// Whatever `base` fails with, unchanged.
    fn scaled_step(
        &self,
        base: &mut O,
        params: &mut [Variable],
        grads: &[&[f32]],
        multiplier: f32,
    ) -> Result<()>;
}

/// Scales updates by intercepting the base optimizer's variable assignments.
///
/// For the duration of one update, every write to one of the updated parameters goes from
/// `new` to `old + (new - old) * multiplier`, writes to any other variable (the optimizer's slots)
/// are left alone. Works with any `Optimizer`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Intercept;

struct ScaleTracked {
    tracked: HashSet<VarId>,
    multiplier: f32,
}

impl AssignHook for ScaleTracked {
    fn rewrite(&self, var: &Variable, new_value: &mut [f32]) {
        if !self.tracked.contains(&var.id()) {
            return;
        }

        let m = self.multiplier;
        new_value
            .iter_mut()
            .zip(var.values())
            .for_each(|(new, old)| *new = old + (*new - old) * m);
    }
}

impl<O: Optimizer + ?Sized> UpdateScaler<O> for Intercept {
    const SUFFIX: &'static str = "TransformerSchedule";

    fn scaled_step(
        &self,
        base: &mut O,
        params: &mut [Variable],
        grads: &[&[f32]],
        multiplier: f32,
    ) -> Result<()> {
        let tracked = params.iter().map(Variable::id).collect();
        let _guard = backend::install(ScaleTracked {
            tracked,
            multiplier,
        });

        base.apply_gradients(params, grads)
    }
}

/// Scales updates by overriding the rate the base optimizer reads for each variable.
///
/// Requires a base optimizer that routes its step size through `DecayedLr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateOverride;

/// The base rate times the multiplier, both in the precision of the variable.
#[derive(Debug, Clone, Copy)]
pub struct ScaledRate {
    pub multiplier: f32,
}

impl RateAccessor for ScaledRate {
    fn rate(&self, decayed_lr: f32, dtype: DType) -> f32 {
        dtype.round(decayed_lr * dtype.round(self.multiplier))
    }
}

/// Applies `first`, then hands the result to `then`.
pub(super) struct Chained<'a> {
    pub first: ScaledRate,
    pub then: &'a dyn RateAccessor,
}

impl RateAccessor for Chained<'_> {
    fn rate(&self, decayed_lr: f32, dtype: DType) -> f32 {
        self.then.rate(self.first.rate(decayed_lr, dtype), dtype)
    }
}

impl<O: DecayedLr + ?Sized> UpdateScaler<O> for RateOverride {
    const SUFFIX: &'static str = "TransformerScheduleV2";

    fn scaled_step(
        &self,
        base: &mut O,
        params: &mut [Variable],
        grads: &[&[f32]],
        multiplier: f32,
    ) -> Result<()> {
        base.apply_gradients_with(params, grads, &ScaledRate { multiplier })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{GradientDescent, GradientDescentWithMomentum};

    #[test]
    fn intercept_scales_parameters_but_not_slots() {
        let mut base = GradientDescentWithMomentum::new(1., 0.5);
        let mut params = [Variable::new("w", vec![0.])];

        Intercept
            .scaled_step(&mut base, &mut params, &[&[2.]], 0.25)
            .unwrap();

        assert_eq!(params[0].values(), &[-0.5]);
        assert_eq!(base.velocity(&params[0]).unwrap().values(), &[2.]);
        assert_eq!(backend::hook_depth(), 0);
    }

    #[test]
    fn intercept_ignores_variables_outside_the_step() {
        let mut base = GradientDescent::new(1.);
        let mut stepped = [Variable::new("a", vec![0.])];
        let mut other = Variable::new("b", vec![0.]);

        let hook = ScaleTracked {
            tracked: stepped.iter().map(Variable::id).collect(),
            multiplier: 0.5,
        };
        let guard = backend::install(hook);
        backend::update(&mut other, vec![4.]).unwrap();
        drop(guard);
        assert_eq!(other.values(), &[4.]);

        Intercept
            .scaled_step(&mut base, &mut stepped, &[&[-4.]], 0.5)
            .unwrap();
        assert_eq!(stepped[0].values(), &[2.]);
    }

    #[test]
    fn rate_override_scales_the_accessor() {
        let mut base = GradientDescent::new(1.);
        let mut params = [Variable::new("w", vec![0.])];

        RateOverride
            .scaled_step(&mut base, &mut params, &[&[2.]], 0.25)
            .unwrap();

        assert_eq!(params[0].values(), &[-0.5]);
    }

    #[test]
    fn scaled_rate_is_in_the_variable_precision() {
        let rate = ScaledRate { multiplier: 1e-3 };
        let r = rate.rate(0.1, DType::F16);
        assert_eq!(DType::F16.round(r), r);
        assert!((r - 1e-4).abs() < 1e-6);
    }
}
