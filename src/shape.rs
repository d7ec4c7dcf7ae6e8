//! Shape codec for the native axis convention.
//!
//! The native engine passes every dimension array in fastest-varying-first
//! order; the host side works in the natural (slowest-varying-first) order.
//! Both directions are a single reversal, so the codec is its own inverse
//! and must be applied exactly once per crossing.

use std::os::raw::{c_int, c_uint};

use crate::error::{BridgeError, BridgeResult};

/// Decode a native dimension array into a host-order shape.
pub fn decode_shape(dims: &[c_uint]) -> Vec<u32> {
    dims.iter().rev().map(|&d| d as u32).collect()
}

/// Encode a host-order shape into a native dimension array.
pub fn encode_shape(shape: &[u32]) -> Vec<c_uint> {
    shape.iter().rev().map(|&d| d as c_uint).collect()
}

/// Decode a raw (ndim, dims-pointer) pair from the boundary.
///
/// # Safety
/// If `ndim > 0`, `dims` must point to at least `ndim` readable `c_uint`s.
pub unsafe fn decode_shape_raw(ndim: c_int, dims: *const c_uint) -> BridgeResult<Vec<u32>> {
    if ndim < 0 {
        return Err(BridgeError::NullArgument("shape dimension count"));
    }
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if dims.is_null() {
        return Err(BridgeError::NullArgument("shape dimension array"));
    }
    let raw = std::slice::from_raw_parts(dims, ndim as usize);
    Ok(decode_shape(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reverses_native_order() {
        assert_eq!(decode_shape(&[100, 28, 28, 1]), vec![1, 28, 28, 100]);
    }

    #[test]
    fn encode_is_inverse_of_decode() {
        let native: Vec<c_uint> = vec![100, 28, 28, 1];
        let host = decode_shape(&native);
        assert_eq!(encode_shape(&host), native);
    }

    #[test]
    fn round_trip_various_ranks() {
        for shape in [vec![7u32], vec![3, 5], vec![2, 3, 4, 5, 6]] {
            let encoded = encode_shape(&shape);
            assert_eq!(decode_shape(&encoded), shape);
        }
    }

    #[test]
    fn empty_shape_round_trips() {
        assert!(decode_shape(&[]).is_empty());
        assert!(encode_shape(&[]).is_empty());
    }

    #[test]
    fn raw_decode_rejects_null_dims() {
        let err = unsafe { decode_shape_raw(3, std::ptr::null()) };
        assert!(err.is_err());
    }
}
