use half::{bf16, f16};
use serde::{Deserialize, Serialize};

/// The storage precision of a variable.
///
/// Values are always handled as `f32` while computing, every committed value is rounded to the
/// precision of the variable it is written to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    #[default]
    F32,
    F16,
    Bf16,
}

impl DType {
    /// Rounds `value` to the nearest number representable in this precision.
    ///
    /// # Arguments
    /// * `value` - The full precision value.
    ///
    /// # Returns
    /// `value` as it would be read back after storing it with this precision.
    pub fn round(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::F16 => f16::from_f32(value).to_f32(),
            DType::Bf16 => bf16::from_f32(value).to_f32(),
        }
    }

    /// Rounds every element of `values` in place.
    pub fn round_slice(self, values: &mut [f32]) {
        if self == DType::F32 {
            return;
        }

        values.iter_mut().for_each(|v| *v = self.round(*v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_is_untouched() {
        let x = 0.1_f32 + 0.2;
        assert_eq!(DType::F32.round(x), x);
    }

    #[test]
    fn half_precisions_lose_bits() {
        let x = 1.0 + 1e-4;
        assert_eq!(DType::F16.round(x), 1.0);
        assert_eq!(DType::Bf16.round(x), 1.0);
        assert_eq!(DType::F16.round(0.5), 0.5);
    }

    #[test]
    fn round_slice_rounds_every_element() {
        let mut xs = [1.0001, 2.0002, 3.0];
        DType::Bf16.round_slice(&mut xs);
        assert_eq!(xs, [1.0, 2.0, 3.0]);
    }
}
