//! Operator descriptors and the token registry.
//!
//! A descriptor binds one attached operator to its exported callback
//! table. The opaque context pointer the native engine hands back is not
//! an object address but a stable integer token, resolved through an
//! explicit registry; tokens stay unique for the process lifetime.

use std::collections::HashMap;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use crossbeam_channel::Sender;

use crate::ffi::types::NativeOpTable;
use crate::operator::Operator;
use crate::pin::LifetimePinner;
use crate::scheduler::{HostScheduler, InvocationSlot, SchedulerMsg};

/// Shared per-descriptor state, reachable from both the native trampolines
/// and the scheduler thread.
pub(crate) struct DescriptorState {
    pub(crate) token: u64,
    /// Non-owning: the attaching side owns the operator.
    pub(crate) op: Weak<dyn Operator>,
    pub(crate) pins: LifetimePinner,
    pub(crate) forward_slot: InvocationSlot,
    pub(crate) backward_slot: InvocationSlot,
    pub(crate) sched: Sender<SchedulerMsg>,
    pub(crate) closed: AtomicBool,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static REGISTRY: OnceLock<RwLock<HashMap<u64, Arc<DescriptorState>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<u64, Arc<DescriptorState>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

pub(crate) fn lookup(token: u64) -> Option<Arc<DescriptorState>> {
    registry()
        .read()
        .expect("descriptor registry poisoned")
        .get(&token)
        .cloned()
}

pub(crate) fn resolve_ctx(ctx: *mut c_void) -> Option<Arc<DescriptorState>> {
    lookup(ctx as u64)
}

/// The per-attachment binding between a host operator and its native-ABI
/// callback table.
///
/// Keep the descriptor alive until the native engine guarantees no further
/// callbacks for this graph node; dropping it earlier would leave the
/// engine holding a dead token, and dropping it tears down the pin set the
/// engine's pointers live in.
pub struct OperatorDescriptor {
    state: Arc<DescriptorState>,
    table: Box<NativeOpTable>,
}

// The table's context pointers carry only the integer token.
unsafe impl Send for OperatorDescriptor {}
unsafe impl Sync for OperatorDescriptor {}

impl OperatorDescriptor {
    /// Build a descriptor for an operator the caller owns elsewhere.
    ///
    /// Constructing a table for an operator that has already been
    /// destroyed is a programming error and panics.
    pub fn new(op: Weak<dyn Operator>, scheduler: &HostScheduler) -> Self {
        assert!(
            op.upgrade().is_some(),
            "descriptor constructed for a destroyed operator"
        );
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(DescriptorState {
            token,
            op,
            pins: LifetimePinner::new(),
            forward_slot: InvocationSlot::new(),
            backward_slot: InvocationSlot::new(),
            sched: scheduler.sender(),
            closed: AtomicBool::new(false),
        });
        registry()
            .write()
            .expect("descriptor registry poisoned")
            .insert(token, Arc::clone(&state));
        let table = Box::new(crate::ffi::table_for_token(token));
        OperatorDescriptor { state, table }
    }

    /// Attach an operator to the bridge, the unit the graph builder holds.
    pub fn attach(op: &Arc<dyn Operator>, scheduler: &HostScheduler) -> Self {
        OperatorDescriptor::new(Arc::downgrade(op), scheduler)
    }

    /// The descriptor's identity token, equal to every context pointer in
    /// the exported table.
    pub fn token(&self) -> u64 {
        self.state.token
    }

    pub fn table(&self) -> &NativeOpTable {
        &self.table
    }

    /// Stable address of the exported table for the descriptor's lifetime.
    pub fn table_ptr(&self) -> *const NativeOpTable {
        &*self.table
    }

    /// Number of buffers currently pinned for the native side.
    pub fn pinned_buffers(&self) -> usize {
        self.state.pins.len()
    }
}

impl Drop for OperatorDescriptor {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        registry()
            .write()
            .expect("descriptor registry poisoned")
            .remove(&self.state.token);
        self.state.drain_pending();
        self.state.pins.release();
    }
}
