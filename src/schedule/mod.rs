mod scaler;
mod scheduled;
mod transformer;

pub use scaler::{Intercept, RateOverride, ScaledRate, UpdateScaler};
pub use scheduled::Scheduled;
pub use transformer::{TransformerSchedule, transformer_schedule};
