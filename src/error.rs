use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, OptimErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum OptimErr {
    /// A hyper-parameter or schedule parameter is outside of its domain.
    InvalidConfig(String),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    /// No factory is registered under the given name.
    UnknownOptimizer(String),
    Serde(serde_json::Error),
}

impl Display for OptimErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            OptimErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "size mismatch for {what}: got {got}, expected {expected}"
            ),
            OptimErr::UnknownOptimizer(name) => {
                write!(f, "there's no optimizer registered under the name {name:?}")
            }
            OptimErr::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for OptimErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OptimErr::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OptimErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}
