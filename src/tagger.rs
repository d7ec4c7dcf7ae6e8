//! Tensor tag classification.
//!
//! Every forward/backward invocation arrives as a flat array of opaque
//! tensor handles plus an integer tag per handle. The tagger partitions
//! that array into the five role buckets with the correct read-only or
//! writable wrapper. Writable handles alias engine-owned storage; the
//! bridge never frees either kind.

use std::os::raw::c_void;

use crate::error::{BridgeError, BridgeResult};

/// Role of a tensor handle within one invocation. Fixed wire encoding.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorTag {
    InputData = 0,
    Output = 1,
    InputGradient = 2,
    OutputGradient = 3,
    AuxiliaryState = 4,
}

impl TensorTag {
    pub fn from_raw(raw: i32) -> BridgeResult<Self> {
        match raw {
            0 => Ok(TensorTag::InputData),
            1 => Ok(TensorTag::Output),
            2 => Ok(TensorTag::InputGradient),
            3 => Ok(TensorTag::OutputGradient),
            4 => Ok(TensorTag::AuxiliaryState),
            other => Err(BridgeError::UnknownTag(other)),
        }
    }
}

/// How the operator must combine its result into an output tensor.
/// Fixed wire encoding; any other value is a protocol error.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Skip the write entirely.
    Null = 0,
    /// Overwrite the destination.
    Write = 1,
    /// Overwrite, destination aliases an input.
    Inplace = 2,
    /// Accumulate into the destination.
    Add = 3,
}

impl WriteMode {
    pub fn from_raw(raw: i32) -> BridgeResult<Self> {
        match raw {
            0 => Ok(WriteMode::Null),
            1 => Ok(WriteMode::Write),
            2 => Ok(WriteMode::Inplace),
            3 => Ok(WriteMode::Add),
            other => Err(BridgeError::UnknownWriteMode(other)),
        }
    }
}

/// Opaque tensor handle exactly as received from the native engine,
/// before classification.
#[derive(Debug, Clone, Copy)]
pub struct NativeHandle(*mut c_void);

// The handle is an opaque token owned by the native engine; the bridge
// moves it between threads but never dereferences it.
unsafe impl Send for NativeHandle {}
unsafe impl Sync for NativeHandle {}

impl NativeHandle {
    pub fn new(ptr: *mut c_void) -> Self {
        NativeHandle(ptr)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

/// Read-only view of an engine-owned tensor.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef(*mut c_void);

impl TensorRef {
    pub fn as_ptr(&self) -> *const c_void {
        self.0
    }
}

/// Writable alias of an engine-owned tensor. The storage belongs to the
/// engine; dropping this wrapper releases nothing.
#[derive(Debug, Clone, Copy)]
pub struct TensorMut(*mut c_void);

impl TensorMut {
    pub fn as_ptr(&self) -> *mut c_void {
        self.0
    }
}

/// One invocation's handles, partitioned by role.
#[derive(Debug, Default)]
pub struct TaggedTensors {
    pub in_data: Vec<TensorRef>,
    pub out_data: Vec<TensorMut>,
    pub in_grad: Vec<TensorMut>,
    pub out_grad: Vec<TensorRef>,
    pub aux: Vec<TensorMut>,
}

/// Stateless classifier for (handle, tag) sequences.
pub struct TensorTagger;

impl TensorTagger {
    /// Partition handles into role buckets, preserving arrival order
    /// within each bucket.
    ///
    /// An unknown tag anywhere fails the whole call; no partial partition
    /// is returned.
    pub fn partition(handles: &[NativeHandle], tags: &[i32]) -> BridgeResult<TaggedTensors> {
        debug_assert_eq!(handles.len(), tags.len());
        let mut out = TaggedTensors::default();
        for (handle, &raw) in handles.iter().zip(tags) {
            match TensorTag::from_raw(raw)? {
                TensorTag::InputData => out.in_data.push(TensorRef(handle.as_ptr())),
                TensorTag::Output => out.out_data.push(TensorMut(handle.as_ptr())),
                TensorTag::InputGradient => out.in_grad.push(TensorMut(handle.as_ptr())),
                TensorTag::OutputGradient => out.out_grad.push(TensorRef(handle.as_ptr())),
                TensorTag::AuxiliaryState => out.aux.push(TensorMut(handle.as_ptr())),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handles(n: usize) -> Vec<NativeHandle> {
        (1..=n)
            .map(|i| NativeHandle::new(i as *mut c_void))
            .collect()
    }

    #[test]
    fn partition_routes_every_tag() {
        let hs = handles(5);
        let tagged = TensorTagger::partition(&hs, &[0, 1, 2, 3, 4]).expect("partition");
        assert_eq!(tagged.in_data.len(), 1);
        assert_eq!(tagged.out_data.len(), 1);
        assert_eq!(tagged.in_grad.len(), 1);
        assert_eq!(tagged.out_grad.len(), 1);
        assert_eq!(tagged.aux.len(), 1);
        assert_eq!(tagged.in_data[0].as_ptr() as usize, 1);
        assert_eq!(tagged.aux[0].as_ptr() as usize, 5);
    }

    #[test]
    fn partition_preserves_bucket_order() {
        let hs = handles(4);
        let tagged = TensorTagger::partition(&hs, &[0, 0, 1, 1]).expect("partition");
        let ins: Vec<usize> = tagged.in_data.iter().map(|t| t.as_ptr() as usize).collect();
        let outs: Vec<usize> = tagged.out_data.iter().map(|t| t.as_ptr() as usize).collect();
        assert_eq!(ins, vec![1, 2]);
        assert_eq!(outs, vec![3, 4]);
    }

    #[test]
    fn unknown_tag_fails_whole_partition() {
        let hs = handles(3);
        let err = TensorTagger::partition(&hs, &[0, 7, 1]).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTag(7)));
    }

    #[test]
    fn write_mode_decoding() {
        assert_eq!(WriteMode::from_raw(0).unwrap(), WriteMode::Null);
        assert_eq!(WriteMode::from_raw(3).unwrap(), WriteMode::Add);
        assert!(matches!(
            WriteMode::from_raw(9),
            Err(BridgeError::UnknownWriteMode(9))
        ));
    }
}
