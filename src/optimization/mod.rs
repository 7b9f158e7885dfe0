mod adam;
mod gradient_descent;
mod gradient_descent_with_momentum;
pub(crate) mod optimizer;

pub use adam::Adam;
pub use gradient_descent::GradientDescent;
pub use gradient_descent_with_momentum::GradientDescentWithMomentum;
pub use optimizer::{
    BaseConfig, BaseRate, Config, DecayedLr, FromConfig, Optimizer, RateAccessor,
};
