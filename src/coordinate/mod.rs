//! Coordinates, tensor strides and coordinate map keys
//!
//! A coordinate is a `D + 1` tuple of `i32`: the batch index followed by `D`
//! spatial components. Coordinates are stored in absolute units, so a map at
//! tensor stride `s` only holds spatial components that are multiples of `s`.

mod batch;
mod key;
mod stride;

pub use batch::CoordinateBatch;
pub use key::CoordinateMapKey;
pub(crate) use stride::STACK_DIMS;
pub use stride::TensorStride;

use smallvec::SmallVec;

/// One owned coordinate, stack-allocated up to 4 spatial axes
pub type Coordinate = SmallVec<[i32; STACK_DIMS + 1]>;

/// Quantize a spatial component down to a multiple of `stride`.
///
/// Rounds toward negative infinity, so `-1` at stride 2 lands on `-2`.
#[inline]
pub fn quantize(value: i32, stride: u32) -> i32 {
    let stride = i64::from(stride);
    let value = i64::from(value);
    // |value.div_euclid(s) * s| <= |value| + s - 1, which may leave i32 only
    // for values near i32::MIN; saturate there.
    let q = value.div_euclid(stride) * stride;
    q.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_floor() {
        assert_eq!(quantize(0, 2), 0);
        assert_eq!(quantize(1, 2), 0);
        assert_eq!(quantize(3, 2), 2);
        assert_eq!(quantize(-1, 2), -2);
        assert_eq!(quantize(-4, 4), -4);
        assert_eq!(quantize(7, 1), 7);
    }
}
