//! C ABI types — the exported callback table and wire constants.

use std::os::raw::{c_char, c_int, c_uint, c_void};

/// Boolean success code every callback returns to the native engine.
pub const CALLBACK_OK: c_int = 1;
/// Boolean failure code; detail stays host-side in the log.
pub const CALLBACK_FAIL: c_int = 0;

/// Forward entry point. `tensors`/`tags` have `num_tensors` entries;
/// `reqs` has one entry per tensor tagged as an output.
pub type ForwardEntry = unsafe extern "C" fn(
    num_tensors: c_int,
    tensors: *mut *mut c_void,
    tags: *const c_int,
    reqs: *const c_int,
    is_train: c_int,
    ctx: *mut c_void,
) -> c_int;

/// Backward entry point. Same layout as [`ForwardEntry`]; `reqs` has one
/// entry per tensor tagged as an input gradient.
pub type BackwardEntry = ForwardEntry;

/// Shape inference. `ndims`/`shapes` have `num_tensors` entries covering
/// arguments, then outputs, then auxiliary states; on entry the argument
/// entries hold the known input shapes, on success every entry is filled
/// with bridge-pinned storage. Dimension arrays are fastest-varying-first.
pub type InferShapeEntry = unsafe extern "C" fn(
    num_tensors: c_int,
    ndims: *mut c_int,
    shapes: *mut *mut c_uint,
    ctx: *mut c_void,
) -> c_int;

/// Name listing. On success `*names` points to a bridge-pinned,
/// null-terminated array of C strings.
pub type ListEntry =
    unsafe extern "C" fn(names: *mut *const *const c_char, ctx: *mut c_void) -> c_int;

/// Backward dependency declaration. The index arrays are sized by the
/// operator's own output/argument arity; on success `*deps` points to
/// `*num_deps` bridge-pinned indices into the concatenated
/// [out-grad, in-data, out-data] sequence.
pub type BackwardDepsEntry = unsafe extern "C" fn(
    out_grad: *const c_int,
    in_data: *const c_int,
    out_data: *const c_int,
    num_deps: *mut c_int,
    deps: *mut *mut c_int,
    ctx: *mut c_void,
) -> c_int;

/// Per-descriptor callback table handed to the native engine.
///
/// Field order is fixed ABI. Every context pointer carries the same value:
/// the descriptor's identity token.
#[repr(C)]
pub struct NativeOpTable {
    pub forward: ForwardEntry,
    pub backward: BackwardEntry,
    pub infer_shape: InferShapeEntry,
    pub list_outputs: ListEntry,
    pub list_arguments: ListEntry,
    pub list_auxiliary_states: ListEntry,
    pub declare_backward_dependency: BackwardDepsEntry,
    pub p_forward: *mut c_void,
    pub p_backward: *mut c_void,
    pub p_infer_shape: *mut c_void,
    pub p_list_outputs: *mut c_void,
    pub p_list_arguments: *mut c_void,
    pub p_list_auxiliary_states: *mut c_void,
    pub p_declare_backward_dependency: *mut c_void,
}
