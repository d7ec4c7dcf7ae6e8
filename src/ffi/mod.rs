//! Native-ABI entry points for the operator callback table.
//!
//! The five synchronous entries (shape inference, name listing, backward
//! dependencies) run to completion on the calling native thread; the
//! engine only invokes them during graph construction, never concurrently
//! with compute. Forward and backward are handed off to the host
//! scheduler and block the native caller until the operator method has
//! run. Every entry contains panics and converts failures into the
//! boolean return convention — nothing ever unwinds across this boundary.

pub mod types;

use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::descriptor::{resolve_ctx, DescriptorState};
use crate::error::{BridgeError, BridgeResult};
use crate::operator::Operator;
use crate::pin::PinKind;
use crate::scheduler::InvocationKind;
use crate::shape;
use crate::tagger::NativeHandle;
use self::types::{NativeOpTable, CALLBACK_FAIL, CALLBACK_OK};

/// Build the callback table for one descriptor token. All context
/// pointers carry the token itself.
pub(crate) fn table_for_token(token: u64) -> NativeOpTable {
    let ctx = token as usize as *mut c_void;
    NativeOpTable {
        forward: forward_entry,
        backward: backward_entry,
        infer_shape: infer_shape_entry,
        list_outputs: list_outputs_entry,
        list_arguments: list_arguments_entry,
        list_auxiliary_states: list_auxiliary_states_entry,
        declare_backward_dependency: declare_backward_dependency_entry,
        p_forward: ctx,
        p_backward: ctx,
        p_infer_shape: ctx,
        p_list_outputs: ctx,
        p_list_arguments: ctx,
        p_list_auxiliary_states: ctx,
        p_declare_backward_dependency: ctx,
    }
}

fn report(method: &'static str, err: &BridgeError) -> c_int {
    if err.is_fatal() {
        log::error!("{method}: {err}");
    } else {
        log::warn!("{method}: {err}");
    }
    CALLBACK_FAIL
}

/// Run a synchronous boundary body, containing panics and converting every
/// failure into the boolean return convention.
fn boundary(method: &'static str, body: impl FnOnce() -> BridgeResult<()>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => CALLBACK_OK,
        Ok(Err(err)) => report(method, &err),
        Err(_) => {
            log::error!("{method}: panic contained at the foreign boundary");
            CALLBACK_FAIL
        }
    }
}

/// Recover the descriptor and a strong operator reference from a context
/// pointer. A stale token or a dead operator is a use-after-teardown.
fn with_descriptor(
    ctx: *mut c_void,
    body: impl FnOnce(&DescriptorState, &Arc<dyn Operator>) -> BridgeResult<()>,
) -> BridgeResult<()> {
    let state = resolve_ctx(ctx).ok_or(BridgeError::UseAfterTeardown(ctx as u64))?;
    let op = state
        .op
        .upgrade()
        .ok_or(BridgeError::UseAfterTeardown(state.token))?;
    body(&state, &op)
}

fn sync_name_list(
    method: &'static str,
    names: *mut *const *const c_char,
    ctx: *mut c_void,
    kind: PinKind,
    list: impl FnOnce(&Arc<dyn Operator>) -> Vec<String>,
) -> c_int {
    boundary(method, || {
        if names.is_null() {
            return Err(BridgeError::NullArgument("name list out"));
        }
        with_descriptor(ctx, |state, op| {
            let head = state.pins.pin_name_list(kind, &list(op))?;
            unsafe {
                *names = head;
            }
            Ok(())
        })
    })
}

fn check_arity(section: &'static str, declared: usize, inferred: usize) -> BridgeResult<()> {
    if declared == inferred {
        Ok(())
    } else {
        Err(BridgeError::ArityMismatch {
            section,
            declared,
            inferred,
        })
    }
}

unsafe fn read_indices(ptr: *const c_int, len: usize) -> BridgeResult<Vec<usize>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    if ptr.is_null() {
        return Err(BridgeError::NullArgument("dependency index array"));
    }
    Ok(std::slice::from_raw_parts(ptr, len)
        .iter()
        .map(|&i| i as usize)
        .collect())
}

/// # Safety
/// `names` must be a valid out-pointer; `ctx` must be a context pointer
/// from a live descriptor's table.
pub unsafe extern "C" fn list_arguments_entry(
    names: *mut *const *const c_char,
    ctx: *mut c_void,
) -> c_int {
    sync_name_list("list_arguments", names, ctx, PinKind::Arguments, |op| {
        op.list_arguments()
    })
}

/// # Safety
/// Same contract as [`list_arguments_entry`].
pub unsafe extern "C" fn list_outputs_entry(
    names: *mut *const *const c_char,
    ctx: *mut c_void,
) -> c_int {
    sync_name_list("list_outputs", names, ctx, PinKind::Outputs, |op| {
        op.list_outputs()
    })
}

/// # Safety
/// Same contract as [`list_arguments_entry`].
pub unsafe extern "C" fn list_auxiliary_states_entry(
    names: *mut *const *const c_char,
    ctx: *mut c_void,
) -> c_int {
    sync_name_list("list_auxiliary_states", names, ctx, PinKind::AuxStates, |op| {
        op.list_auxiliary_states()
    })
}

/// # Safety
/// `ndims` and `shapes` must each have `num_tensors` valid entries; the
/// argument entries must describe readable dimension arrays. `ctx` must
/// be a context pointer from a live descriptor's table.
pub unsafe extern "C" fn infer_shape_entry(
    num_tensors: c_int,
    ndims: *mut c_int,
    shapes: *mut *mut c_uint,
    ctx: *mut c_void,
) -> c_int {
    boundary("infer_shape", || {
        if ndims.is_null() || shapes.is_null() {
            return Err(BridgeError::NullArgument("shape arrays"));
        }
        with_descriptor(ctx, |state, op| {
            let n_args = op.list_arguments().len();
            let n_out = op.list_outputs().len();
            let n_aux = op.list_auxiliary_states().len();
            let total = n_args + n_out + n_aux;
            check_arity("infer_shape tensors", total, num_tensors.max(0) as usize)?;

            let mut in_shapes = Vec::with_capacity(n_args);
            for i in 0..n_args {
                let (nd, dims) = unsafe { (*ndims.add(i), *shapes.add(i)) };
                in_shapes.push(unsafe { shape::decode_shape_raw(nd, dims) }?);
            }
            let inferred = op
                .infer_shape(&in_shapes)
                .map_err(|source| BridgeError::OperatorFailed {
                    method: "infer_shape",
                    source,
                })?;
            check_arity("arguments", n_args, inferred.inputs.len())?;
            check_arity("outputs", n_out, inferred.outputs.len())?;
            check_arity("auxiliary states", n_aux, inferred.aux.len())?;

            let dims: Vec<Vec<c_uint>> = inferred
                .inputs
                .iter()
                .chain(&inferred.outputs)
                .chain(&inferred.aux)
                .map(|s| shape::encode_shape(s))
                .collect();
            for (i, (ptr, nd)) in state.pins.pin_shape_set(dims).into_iter().enumerate() {
                unsafe {
                    *ndims.add(i) = nd;
                    *shapes.add(i) = ptr;
                }
            }
            Ok(())
        })
    })
}

/// # Safety
/// The index arrays must match the operator's output/argument arity;
/// `num_deps` and `deps` must be valid out-pointers. `ctx` must be a
/// context pointer from a live descriptor's table.
pub unsafe extern "C" fn declare_backward_dependency_entry(
    out_grad: *const c_int,
    in_data: *const c_int,
    out_data: *const c_int,
    num_deps: *mut c_int,
    deps: *mut *mut c_int,
    ctx: *mut c_void,
) -> c_int {
    boundary("declare_backward_dependency", || {
        if num_deps.is_null() || deps.is_null() {
            return Err(BridgeError::NullArgument("dependency out"));
        }
        with_descriptor(ctx, |state, op| {
            let n_in = op.list_arguments().len();
            let n_out = op.list_outputs().len();
            let og = unsafe { read_indices(out_grad, n_out) }?;
            let id = unsafe { read_indices(in_data, n_in) }?;
            let od = unsafe { read_indices(out_data, n_out) }?;
            let result = op.declare_backward_dependency(&og, &id, &od);
            let (count, head) = state.pins.pin_dep_list(&result);
            unsafe {
                *num_deps = count;
                *deps = head;
            }
            Ok(())
        })
    })
}

fn cross_thread_entry(
    method: &'static str,
    kind: InvocationKind,
    num_tensors: c_int,
    tensors: *mut *mut c_void,
    tags: *const c_int,
    reqs: *const c_int,
    is_train: c_int,
    ctx: *mut c_void,
) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> BridgeResult<bool> {
        if num_tensors < 0 {
            return Err(BridgeError::NullArgument("tensor count"));
        }
        let n = num_tensors as usize;
        if n > 0 && (tensors.is_null() || tags.is_null()) {
            return Err(BridgeError::NullArgument("tensor arrays"));
        }
        let state = resolve_ctx(ctx).ok_or(BridgeError::UseAfterTeardown(ctx as u64))?;

        // Snapshot everything before blocking; the caller's arrays are
        // only guaranteed for the duration of this call.
        let mut handles = Vec::with_capacity(n);
        let mut tag_vals = Vec::with_capacity(n);
        if n > 0 {
            let raw_tensors = unsafe { std::slice::from_raw_parts(tensors, n) };
            let raw_tags = unsafe { std::slice::from_raw_parts(tags, n) };
            handles.extend(raw_tensors.iter().map(|&p| NativeHandle::new(p)));
            tag_vals.extend(raw_tags.iter().copied());
        }
        let primary = match kind {
            InvocationKind::Forward => 1,
            InvocationKind::Backward => 2,
        };
        let n_req = tag_vals.iter().filter(|&&t| t == primary).count();
        if n_req > 0 && reqs.is_null() {
            return Err(BridgeError::NullArgument("write request array"));
        }
        let req_vals = if n_req == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(reqs, n_req) }.to_vec()
        };
        state.arm(kind, handles, tag_vals, req_vals, is_train != 0)
    }));
    match outcome {
        Ok(Ok(true)) => CALLBACK_OK,
        // Host-side failures were already logged by the consumer.
        Ok(Ok(false)) => CALLBACK_FAIL,
        Ok(Err(err)) => report(method, &err),
        Err(_) => {
            log::error!("{method}: panic contained at the foreign boundary");
            CALLBACK_FAIL
        }
    }
}

/// # Safety
/// `tensors`/`tags` must have `num_tensors` valid entries and `reqs` one
/// entry per output-tagged tensor; `ctx` must be a context pointer from a
/// live descriptor's table. Blocks the calling thread until the host side
/// has executed the operator's `forward`.
pub unsafe extern "C" fn forward_entry(
    num_tensors: c_int,
    tensors: *mut *mut c_void,
    tags: *const c_int,
    reqs: *const c_int,
    is_train: c_int,
    ctx: *mut c_void,
) -> c_int {
    cross_thread_entry(
        "forward",
        InvocationKind::Forward,
        num_tensors,
        tensors,
        tags,
        reqs,
        is_train,
        ctx,
    )
}

/// # Safety
/// Same contract as [`forward_entry`], with `reqs` sized by the
/// input-gradient-tagged tensors. Blocks until `backward` has executed.
pub unsafe extern "C" fn backward_entry(
    num_tensors: c_int,
    tensors: *mut *mut c_void,
    tags: *const c_int,
    reqs: *const c_int,
    is_train: c_int,
    ctx: *mut c_void,
) -> c_int {
    cross_thread_entry(
        "backward",
        InvocationKind::Backward,
        num_tensors,
        tensors,
        tags,
        reqs,
        is_train,
        ctx,
    )
}
