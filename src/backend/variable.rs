use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicU64, Ordering},
};

use super::DType;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a `Variable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

impl VarId {
    fn next() -> Self {
        VarId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarId({})", self.0)
    }
}

/// A named, flat buffer of values stored with a given precision.
///
/// Both trainable parameters and the optimizers' internal slots (momentum, moment estimates) are
/// variables, so every write an optimizer performs goes through `backend::update`.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VarId,
    name: String,
    dtype: DType,
    values: Vec<f32>,
}

impl Variable {
    /// Creates a new `F32` variable.
    ///
    /// # Arguments
    /// * `name` - A human readable name, only used for diagnostics.
    /// * `values` - The initial values.
    ///
    /// # Returns
    /// A new `Variable` with a fresh id.
    pub fn new(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self::with_dtype(name, DType::F32, values)
    }

    /// Creates a new variable stored with `dtype`, the initial values are rounded to it.
    pub fn with_dtype(name: impl Into<String>, dtype: DType, mut values: Vec<f32>) -> Self {
        dtype.round_slice(&mut values);

        Self {
            id: VarId::next(),
            name: name.into(),
            dtype,
            values,
        }
    }

    /// Creates a zero filled variable shaped and typed like `like`.
    pub fn zeros_like(name: impl Into<String>, like: &Variable) -> Self {
        Self::with_dtype(name, like.dtype, vec![0.; like.len()])
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces the stored values, callers must go through `backend::update`.
    pub(super) fn commit(&mut self, values: Vec<f32>) {
        self.values = values;
    }
}
