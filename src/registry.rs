use std::{collections::HashMap, fmt, sync::OnceLock};

use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{OptimErr, Result},
    optimization::{
        Adam, Config, DecayedLr, FromConfig, GradientDescent, GradientDescentWithMomentum,
        Optimizer,
    },
    schedule::{Intercept, RateOverride, Scheduled, UpdateScaler},
};

/// Builds an optimizer from its configuration mapping.
pub type Factory = fn(&Config) -> Result<Box<dyn Optimizer>>;

/// An optimizer as it is stored next to a model checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedOptimizer {
    pub class_name: String,
    pub config: Config,
}

impl SerializedOptimizer {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn build<O: FromConfig + 'static>(config: &Config) -> Result<Box<dyn Optimizer>> {
    Ok(Box::new(O::from_config(config)?))
}

fn build_scheduled<O, S>(config: &Config) -> Result<Box<dyn Optimizer>>
where
    O: FromConfig + 'static,
    S: UpdateScaler<O> + Default + 'static,
{
    Ok(Box::new(Scheduled::<O, S>::from_config(config)?))
}

/// Maps optimizer names to the factories rebuilding them.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish()
    }
}

impl Registry {
    /// Creates an empty `Registry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `Registry` holding every base optimizer of this crate, each one also with both
    /// transformer schedule variants under their default names.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_scheduled::<GradientDescent>();
        registry.register_scheduled::<GradientDescentWithMomentum>();
        registry.register_scheduled::<Adam>();
        registry
    }

    fn register_scheduled<O: FromConfig + DecayedLr + 'static>(&mut self) {
        self.register(O::NAME, build::<O>);
        self.register_transformer_schedule::<O>(None);
        self.register_transformer_schedule_v2::<O>(None);
    }

    /// Registers `factory` under `name`.
    ///
    /// # Returns
    /// The factory previously registered under `name`, if any.
    pub fn register(&mut self, name: impl Into<String>, factory: Factory) -> Option<Factory> {
        let name = name.into();
        debug!("registering optimizer {name}");
        self.factories.insert(name, factory)
    }

    /// Registers the assignment intercepting transformer schedule over `O`.
    ///
    /// # Arguments
    /// * `name` - The registration name, defaults to `"<O::NAME>TransformerSchedule"`.
    ///
    /// # Returns
    /// The name used.
    pub fn register_transformer_schedule<O: FromConfig + 'static>(
        &mut self,
        name: Option<&str>,
    ) -> String {
        let name = name.map_or_else(
            || format!("{}{}", O::NAME, <Intercept as UpdateScaler<O>>::SUFFIX),
            str::to_string,
        );

        self.register(name.clone(), build_scheduled::<O, Intercept>);
        name
    }

    /// Registers the rate overriding transformer schedule over `O`.
    ///
    /// # Arguments
    /// * `name` - The registration name, defaults to `"<O::NAME>TransformerScheduleV2"`.
    ///
    /// # Returns
    /// The name used.
    pub fn register_transformer_schedule_v2<O: FromConfig + DecayedLr + 'static>(
        &mut self,
        name: Option<&str>,
    ) -> String {
        let name = name.map_or_else(
            || format!("{}{}", O::NAME, <RateOverride as UpdateScaler<O>>::SUFFIX),
            str::to_string,
        );

        self.register(name.clone(), build_scheduled::<O, RateOverride>);
        name
    }

    pub fn get(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Rebuilds a serialized optimizer.
    ///
    /// # Errors
    /// `OptimErr::UnknownOptimizer` if nothing is registered under `class_name`, otherwise whatever
    /// the factory fails with.
    pub fn deserialize(&self, serialized: &SerializedOptimizer) -> Result<Box<dyn Optimizer>> {
        let SerializedOptimizer { class_name, config } = serialized;

        let factory = self
            .get(class_name)
            .ok_or_else(|| OptimErr::UnknownOptimizer(class_name.clone()))?;

        let mut config = config.clone();
        config
            .entry("name")
            .or_insert_with(|| Value::String(class_name.clone()));

        factory(&config)
    }
}

/// The process wide registry, filled with `Registry::with_builtins` on first use.
pub fn global() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

    REGISTRY.get_or_init(|| {
        let registry = Registry::with_builtins();
        info!("optimizer registry ready with {} entries", registry.names().len());
        RwLock::new(registry)
    })
}

/// Registers a transformer schedule over `O` that intercepts `O`'s parameter assignments.
///
/// # Arguments
/// * `name` - The registration name, defaults to `"<O::NAME>TransformerSchedule"`.
///
/// # Returns
/// The name to give the instances, see `Scheduled::with_name`.
pub fn extend_with_transformer_schedule<O: FromConfig + 'static>(name: Option<&str>) -> String {
    global().write().register_transformer_schedule::<O>(name)
}

/// Registers a transformer schedule over `O` that overrides `O`'s learning rate accessor.
///
/// # Arguments
/// * `name` - The registration name, defaults to `"<O::NAME>TransformerScheduleV2"`.
///
/// # Returns
/// The name to give the instances, see `Scheduled::with_name`.
pub fn extend_with_transformer_schedule_v2<O: FromConfig + DecayedLr + 'static>(
    name: Option<&str>,
) -> String {
    global().write().register_transformer_schedule_v2::<O>(name)
}

/// Captures everything needed to rebuild `optimizer` through the registry.
pub fn serialize(optimizer: &dyn Optimizer) -> SerializedOptimizer {
    SerializedOptimizer {
        class_name: optimizer.name().to_string(),
        config: optimizer.config(),
    }
}

/// Rebuilds a serialized optimizer through the global registry.
///
/// # Errors
/// See `Registry::deserialize`.
pub fn deserialize(serialized: &SerializedOptimizer) -> Result<Box<dyn Optimizer>> {
    global().read().deserialize(serialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TransformerSchedule;

    #[test]
    fn builtins_are_registered_under_their_default_names() {
        let registry = Registry::with_builtins();

        for name in [
            "GradientDescent",
            "GradientDescentTransformerSchedule",
            "GradientDescentTransformerScheduleV2",
            "GradientDescentWithMomentum",
            "GradientDescentWithMomentumTransformerSchedule",
            "GradientDescentWithMomentumTransformerScheduleV2",
            "Adam",
            "AdamTransformerSchedule",
            "AdamTransformerScheduleV2",
        ] {
            assert!(registry.contains(name), "{name} is missing");
        }

        assert_eq!(registry.names().len(), 9);
    }

    #[test]
    fn unknown_names_are_reported() {
        let serialized = SerializedOptimizer {
            class_name: "Lamb".into(),
            config: Config::new(),
        };

        let err = Registry::new().deserialize(&serialized).err().unwrap();
        assert!(matches!(err, OptimErr::UnknownOptimizer(name) if name == "Lamb"));
    }

    #[test]
    fn custom_names_rebuild_with_the_same_name() {
        let mut registry = Registry::new();
        let name = registry.register_transformer_schedule::<Adam>(Some("Noam"));
        assert_eq!(name, "Noam");

        let opt = Scheduled::intercepting(Adam::new(1.), TransformerSchedule::default());
        let mut serialized = serialize(&opt.with_name(name));
        serialized.config.remove("name");

        let rebuilt = registry.deserialize(&serialized).unwrap();
        assert_eq!(rebuilt.name(), "Noam");
    }

    #[test]
    fn re_registering_replaces_the_factory() {
        let mut registry = Registry::new();
        assert!(registry.register("Opt", build::<Adam>).is_none());
        assert!(registry.register("Opt", build::<GradientDescent>).is_some());

        let serialized = serialize(&GradientDescent::new(0.1));
        let serialized = SerializedOptimizer {
            class_name: "Opt".into(),
            ..serialized
        };

        let rebuilt = registry.deserialize(&serialized).unwrap();
        assert_eq!(rebuilt.name(), "GradientDescent");
    }
}
