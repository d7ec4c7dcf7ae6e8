//! Cross-thread invocation of forward/backward.
//!
//! The native engine calls forward/backward from its own worker pool, but
//! operator methods may only run on the host's single logical execution
//! thread. Each descriptor owns two independent single-producer slots
//! (forward, backward); arming one writes a [`PendingInvocation`] into the
//! slot, wakes the host scheduler, and blocks the native caller on a
//! completion rendezvous until the operator method has run. From the
//! native side the round trip looks like a normal synchronous call.
//!
//! Within one descriptor, calls are serialized by construction: the native
//! caller blocks for the full round trip, so a second invocation cannot be
//! armed before the first completes. Across descriptors the slots are
//! fully independent; execution is serialized only by the single scheduler
//! thread. There is no cancellation, no timeout and no retry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::descriptor::{lookup, DescriptorState};
use crate::error::{BridgeError, BridgeResult};
use crate::operator::{BackwardArgs, ForwardArgs};
use crate::tagger::{NativeHandle, TensorTagger, WriteMode};

/// Which operator method an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvocationKind {
    Forward,
    Backward,
}

impl InvocationKind {
    pub(crate) fn method(self) -> &'static str {
        match self {
            InvocationKind::Forward => "forward",
            InvocationKind::Backward => "backward",
        }
    }
}

/// Immutable snapshot of one native forward/backward call. Valid only for
/// the duration of the invocation.
pub(crate) struct PendingInvocation {
    pub handles: Vec<NativeHandle>,
    pub tags: Vec<i32>,
    pub reqs: Vec<i32>,
    pub is_train: bool,
    /// Releases the blocked native thread with the boolean result.
    pub done: Sender<bool>,
}

/// One direction's shared slot. Capacity one: the protocol allows at most
/// one invocation in flight per slot.
pub(crate) struct InvocationSlot {
    tx: Sender<PendingInvocation>,
    rx: Receiver<PendingInvocation>,
}

impl InvocationSlot {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(1);
        InvocationSlot { tx, rx }
    }
}

pub(crate) enum SchedulerMsg {
    Wake { token: u64, kind: InvocationKind },
    Shutdown,
}

/// The host's single logical execution thread.
///
/// One dedicated thread drains the run queue and executes operator
/// methods; everything an operator does happens on this thread. Dropping
/// the scheduler sends an explicit shutdown and joins the thread.
pub struct HostScheduler {
    queue: Sender<SchedulerMsg>,
    worker: Option<JoinHandle<()>>,
}

impl HostScheduler {
    pub fn new() -> Self {
        let (queue, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("customop-host".to_string())
            .spawn(move || run_loop(rx))
            .expect("failed to spawn host scheduler thread");
        HostScheduler {
            queue,
            worker: Some(worker),
        }
    }

    pub(crate) fn sender(&self) -> Sender<SchedulerMsg> {
        self.queue.clone()
    }
}

impl Default for HostScheduler {
    fn default() -> Self {
        HostScheduler::new()
    }
}

impl Drop for HostScheduler {
    fn drop(&mut self) {
        let _ = self.queue.send(SchedulerMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_loop(rx: Receiver<SchedulerMsg>) {
    loop {
        match rx.recv() {
            Ok(SchedulerMsg::Wake { token, kind }) => match lookup(token) {
                Some(state) => state.run_invocation(kind),
                // Class (c): the engine promised no calls after teardown.
                None => log::error!(
                    "{} wakeup for descriptor {} after teardown",
                    kind.method(),
                    token
                ),
            },
            Ok(SchedulerMsg::Shutdown) | Err(_) => break,
        }
    }
}

impl DescriptorState {
    fn slot(&self, kind: InvocationKind) -> &InvocationSlot {
        match kind {
            InvocationKind::Forward => &self.forward_slot,
            InvocationKind::Backward => &self.backward_slot,
        }
    }

    /// Arm an invocation from a native worker thread and block until the
    /// host side has executed it. Returns the boolean the native caller
    /// expects; `Err` covers failures before the handoff.
    pub(crate) fn arm(
        &self,
        kind: InvocationKind,
        handles: Vec<NativeHandle>,
        tags: Vec<i32>,
        reqs: Vec<i32>,
        is_train: bool,
    ) -> BridgeResult<bool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::UseAfterTeardown(self.token));
        }
        let (done, done_rx) = bounded(1);
        let inv = PendingInvocation {
            handles,
            tags,
            reqs,
            is_train,
            done,
        };
        self.slot(kind)
            .tx
            .send(inv)
            .map_err(|_| BridgeError::SchedulerDown)?;
        self.sched
            .send(SchedulerMsg::Wake {
                token: self.token,
                kind,
            })
            .map_err(|_| BridgeError::SchedulerDown)?;
        done_rx.recv().map_err(|_| BridgeError::SchedulerDown)
    }

    /// Teardown hardening: the engine promises no invocation is armed
    /// when a node is removed, but if one is, release the blocked native
    /// thread with a failure instead of leaving it waiting forever.
    pub(crate) fn drain_pending(&self) {
        for kind in [InvocationKind::Forward, InvocationKind::Backward] {
            while let Ok(inv) = self.slot(kind).rx.try_recv() {
                log::error!(
                    "{} still armed on descriptor {} at teardown",
                    kind.method(),
                    self.token
                );
                let _ = inv.done.send(false);
            }
        }
    }

    /// Scheduler-thread half: snapshot the slot, run the operator method,
    /// release the blocked native thread.
    pub(crate) fn run_invocation(&self, kind: InvocationKind) {
        let inv = match self.slot(kind).rx.try_recv() {
            Ok(inv) => inv,
            Err(_) => {
                log::error!(
                    "spurious {} wakeup for descriptor {}",
                    kind.method(),
                    self.token
                );
                return;
            }
        };
        let ok = match self.execute(kind, &inv) {
            Ok(()) => true,
            Err(err) => {
                if err.is_fatal() {
                    log::error!("{} on descriptor {}: {}", kind.method(), self.token, err);
                } else {
                    log::warn!("{} on descriptor {}: {}", kind.method(), self.token, err);
                }
                false
            }
        };
        let _ = inv.done.send(ok);
    }

    fn execute(&self, kind: InvocationKind, inv: &PendingInvocation) -> BridgeResult<()> {
        let op = self
            .op
            .upgrade()
            .ok_or(BridgeError::UseAfterTeardown(self.token))?;
        let tagged = TensorTagger::partition(&inv.handles, &inv.tags)?;
        let req = inv
            .reqs
            .iter()
            .map(|&r| WriteMode::from_raw(r))
            .collect::<BridgeResult<Vec<_>>>()?;
        let method = kind.method();
        let call = || match kind {
            InvocationKind::Forward => op.forward(ForwardArgs {
                is_train: inv.is_train,
                in_data: &tagged.in_data,
                out_data: &tagged.out_data,
                aux: &tagged.aux,
                req: &req,
            }),
            InvocationKind::Backward => op.backward(BackwardArgs {
                out_grad: &tagged.out_grad,
                in_data: &tagged.in_data,
                out_data: &tagged.out_data,
                in_grad: &tagged.in_grad,
                aux: &tagged.aux,
                req: &req,
            }),
        };
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(BridgeError::OperatorFailed { method, source }),
            Err(_) => Err(BridgeError::OperatorPanicked { method }),
        }
    }
}
