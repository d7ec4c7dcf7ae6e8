//! Lifetime pinning for buffers handed across the foreign boundary.
//!
//! Every pointer the native engine may dereference after a callback
//! returns must be backed by storage the bridge still owns. The pinner is
//! a per-descriptor side table holding that storage. A newer call of the
//! same kind supersedes the previous buffer; everything is released once,
//! at descriptor teardown. No other component deallocates pinned storage.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::Mutex;

use crate::error::{BridgeError, BridgeResult};

/// Which callback produced a pinned buffer. One live buffer per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinKind {
    Arguments,
    Outputs,
    AuxStates,
    InferShape,
    BackwardDeps,
}

/// Owned storage behind a pointer the native side holds.
enum PinnedBuffer {
    /// CStrings plus a null-terminated array of pointers into them.
    NameList {
        _strings: Vec<CString>,
        _ptrs: Vec<*const c_char>,
    },
    /// Per-tensor dimension arrays in native axis order.
    ShapeSet { _dims: Vec<Vec<c_uint>> },
    /// Zero-based dependency indices.
    DepList { _deps: Vec<c_int> },
}

// Pointers stored here only ever point into the owned Vec/CString
// allocations alongside them; the buffer moves between threads as a unit.
unsafe impl Send for PinnedBuffer {}

/// Per-descriptor retained-buffer table.
#[derive(Default)]
pub struct LifetimePinner {
    buffers: Mutex<HashMap<PinKind, PinnedBuffer>>,
}

impl LifetimePinner {
    pub fn new() -> Self {
        LifetimePinner::default()
    }

    /// Pin a name list, returning the null-terminated pointer array the
    /// native side will walk. Valid until teardown or the next call of
    /// the same kind.
    pub(crate) fn pin_name_list(
        &self,
        kind: PinKind,
        names: &[String],
    ) -> BridgeResult<*const *const c_char> {
        let mut strings = Vec::with_capacity(names.len());
        for name in names {
            let cstr = CString::new(name.as_str())
                .map_err(|_| BridgeError::InvalidName(name.clone()))?;
            strings.push(cstr);
        }
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        let head = ptrs.as_ptr();
        self.insert(kind, PinnedBuffer::NameList {
            _strings: strings,
            _ptrs: ptrs,
        });
        Ok(head)
    }

    /// Pin a set of native-order dimension arrays, returning one
    /// (pointer, ndim) pair per entry in order.
    pub(crate) fn pin_shape_set(&self, dims: Vec<Vec<c_uint>>) -> Vec<(*mut c_uint, c_int)> {
        let entries: Vec<(*mut c_uint, c_int)> = dims
            .iter()
            .map(|d| (d.as_ptr() as *mut c_uint, d.len() as c_int))
            .collect();
        self.insert(PinKind::InferShape, PinnedBuffer::ShapeSet { _dims: dims });
        entries
    }

    /// Pin a dependency-index array, returning (count, pointer).
    pub(crate) fn pin_dep_list(&self, deps: &[usize]) -> (c_int, *mut c_int) {
        let deps: Vec<c_int> = deps.iter().map(|&d| d as c_int).collect();
        let count = deps.len() as c_int;
        let head = deps.as_ptr() as *mut c_int;
        self.insert(PinKind::BackwardDeps, PinnedBuffer::DepList { _deps: deps });
        (count, head)
    }

    /// Drop every retained buffer. Called exactly once, at teardown.
    pub(crate) fn release(&self) {
        self.buffers.lock().expect("pin table poisoned").clear();
    }

    /// Number of currently retained buffers.
    pub fn len(&self) -> usize {
        self.buffers.lock().expect("pin table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, kind: PinKind, buffer: PinnedBuffer) {
        self.buffers
            .lock()
            .expect("pin table poisoned")
            .insert(kind, buffer);
    }
}
