//! Coordinate map key: identity of one map inside a manager

use super::stride::TensorStride;
use std::fmt;

/// Identifies one coordinate map by tensor stride and label
///
/// Two keys with the same stride and label name the same map. The label
/// separates unrelated sparse tensors that live at the same resolution.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CoordinateMapKey {
    tensor_stride: TensorStride,
    label: String,
}

impl CoordinateMapKey {
    /// Create a key from a stride and a label
    pub fn new(tensor_stride: impl Into<TensorStride>, label: impl Into<String>) -> Self {
        Self {
            tensor_stride: tensor_stride.into(),
            label: label.into(),
        }
    }

    /// Key of the origin map for `dimension` spatial axes
    pub fn origin(dimension: usize) -> Self {
        Self::new(TensorStride::origin(dimension), "")
    }

    /// Spatial tensor stride
    pub fn tensor_stride(&self) -> &TensorStride {
        &self.tensor_stride
    }

    /// User label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of spatial axes
    pub fn dimension(&self) -> usize {
        self.tensor_stride.ndim()
    }

    /// Key of the same label at another stride
    pub fn with_stride(&self, tensor_stride: TensorStride) -> Self {
        Self {
            tensor_stride,
            label: self.label.clone(),
        }
    }
}

impl fmt::Display for CoordinateMapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.tensor_stride, self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identity() {
        let a = CoordinateMapKey::new([2, 2], "scan");
        let b = CoordinateMapKey::new(vec![2, 2], String::from("scan"));
        assert_eq!(a, b);
        assert_ne!(a, CoordinateMapKey::new([2, 2], ""));
        assert_ne!(a, a.with_stride(TensorStride::from([4, 4])));
    }

    #[test]
    fn test_key_display() {
        let key = CoordinateMapKey::new([1, 1, 1], "");
        assert_eq!(key.to_string(), "[1, 1, 1]:\"\"");
        assert_eq!(CoordinateMapKey::origin(2).to_string(), "[0, 0]:\"\"");
    }
}
