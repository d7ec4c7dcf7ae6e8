//! customop-bridge: cross-boundary callback bridge for host-defined
//! tensor operators.
//!
//! A native, multi-threaded tensor engine invokes user operator behavior
//! through a fixed table of C function pointers; the operator logic itself
//! runs on a single host execution thread. This crate provides:
//! - **ABI export**: a per-operator [`NativeOpTable`] plus an opaque
//!   context token the engine hands back on every call
//! - **Cross-thread invocation**: forward/backward arriving on arbitrary
//!   native worker threads are executed on the [`HostScheduler`] thread
//!   while the native caller blocks, preserving synchronous-call semantics
//! - **Marshaling**: axis-order shape codec, tensor tag classification,
//!   and name/shape/dependency buffers pinned for the native side's use
//! - **Boundary safety**: every failure or panic is logged and reported
//!   as a boolean; nothing unwinds across the foreign boundary
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use customop_bridge::{HostScheduler, Operator, OperatorDescriptor};
//!
//! let scheduler = HostScheduler::new();
//! let op: Arc<dyn Operator> = Arc::new(MyOperator::new());
//! let descriptor = OperatorDescriptor::attach(&op, &scheduler);
//! // hand descriptor.table_ptr() to the native engine; keep the
//! // descriptor alive until the graph node is torn down
//! ```

pub mod descriptor;
pub mod error;
pub mod ffi;
pub mod operator;
pub mod pin;
pub mod scheduler;
pub mod shape;
pub mod tagger;

pub use descriptor::OperatorDescriptor;
pub use error::{BridgeError, BridgeResult, OpError};
pub use ffi::types::{
    BackwardDepsEntry, BackwardEntry, ForwardEntry, InferShapeEntry, ListEntry, NativeOpTable,
    CALLBACK_FAIL, CALLBACK_OK,
};
pub use operator::{BackwardArgs, ForwardArgs, InferredShapes, Operator};
pub use pin::{LifetimePinner, PinKind};
pub use scheduler::HostScheduler;
pub use shape::{decode_shape, encode_shape};
pub use tagger::{
    NativeHandle, TaggedTensors, TensorMut, TensorRef, TensorTag, TensorTagger, WriteMode,
};
