//! `AsyncBlock` and the runner that drives an [`Operation`] through its lifecycle.
//!
//! # Ownership
//!
//! The operation lives in a single slot inside the block. A capability call checks it out of
//! the slot, runs without any lock held, and checks it back in. Everything that would destroy
//! or expose the operation (cleanup, status publication, the completion callback) waits until
//! it is back in the slot, so an operation is never dropped underneath its own capability and
//! callers never observe a terminal status while a capability is still running.
//!
//! Between `run` and publication the block keeps itself alive for as long as something can
//! still finish the operation: a caller's `AsyncBlock`, a live [`Completer`], or a queued
//! `do_work` pass. Callers may therefore drop their `AsyncBlock` right after `run` and still
//! get the completion callback. Once none of those remain the operation is dropped
//! unpublished. A `do_work` pass that is dropped unrun (its queue was terminated) fails the
//! operation with [`OpError::QueueTerminated`].
//!
//! [`Completer`]: crate::Completer

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use errand_queue::TaskQueue;
use errand_types::{CorrelationToken, OpError};
use tokio::sync::Notify;

use crate::capability::{CancelDecision, Operation, WorkStatus};
use crate::context::OpContext;
use crate::handle::ResultHandle;
use crate::operation::{OperationTag, receipt_is_legal, transition_receipt};

/// Completion notification, run on the bound queue's Completion port.
pub type BlockCallback = Box<dyn FnOnce(&AsyncBlock) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Bytes(usize),
    Handle,
}

struct OpState {
    tag: OperationTag,
    op: Option<Box<dyn Operation>>,
    checked_out: bool,
    outcome: Option<Result<Completion, OpError>>,
    published: bool,
    cancel_requested: bool,
    deferred_work: usize,
    empty_result_taken: bool,
    /// Live caller `AsyncBlock` handles.
    handles: usize,
    /// Live `Completer`s.
    completers: usize,
    keepalive: Option<Arc<BlockInner>>,
}

pub(crate) struct BlockInner {
    queue: TaskQueue,
    token: CorrelationToken,
    callback: Mutex<Option<BlockCallback>>,
    state: Mutex<OpState>,
    published: Condvar,
    notify: Notify,
}

impl BlockInner {
    fn lock(&self) -> MutexGuard<'_, OpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn token(&self) -> CorrelationToken {
        self.token
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    pub(crate) fn completer_created(&self) {
        self.lock().completers += 1;
    }

    pub(crate) fn completer_dropped(&self) {
        let mut state = self.lock();
        state.completers = state.completers.saturating_sub(1);
        let keepalive = self.abandon(&mut state);
        drop(state);
        drop(keepalive);
    }

    /// Give up the self-reference once nothing can finish the operation any more.
    ///
    /// The returned reference must be dropped after the state lock is released.
    fn abandon(&self, state: &mut OpState) -> Option<Arc<BlockInner>> {
        if state.handles > 0 || state.completers > 0 || state.checked_out {
            return None;
        }
        let keepalive = state.keepalive.take()?;
        tracing::debug!(
            token = %self.token,
            state = %state.tag,
            "Operation abandoned before completion"
        );
        Some(keepalive)
    }

    fn advance(&self, state: &mut OpState, to: OperationTag) -> Result<(), OpError> {
        let Some(receipt) = transition_receipt(state.tag, to) else {
            tracing::error!(
                token = %self.token,
                from = %state.tag,
                %to,
                "Illegal operation transition"
            );
            return Err(OpError::Usage("illegal operation state transition"));
        };
        debug_assert!(receipt_is_legal(receipt));
        tracing::debug!(
            token = %self.token,
            from = %receipt.from(),
            edge = ?receipt.edge(),
            to = %receipt.to(),
            "Operation transition"
        );
        state.tag = receipt.to();
        Ok(())
    }

    /// Make the terminal status visible. Caller holds the state lock and the op is in its slot.
    fn publish(&self, state: &mut OpState) -> Publication {
        state.published = true;
        let cleanup_now = matches!(
            state.outcome,
            Some(Err(_) | Ok(Completion::Bytes(0)))
        );
        let cleanup = if cleanup_now && self.advance(state, OperationTag::Destroyed).is_ok() {
            state.op.take()
        } else {
            None
        };
        self.published.notify_all();
        Publication {
            cleanup,
            keepalive: state.keepalive.take(),
        }
    }

    fn post_callback(self: &Arc<Self>) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            return;
        };
        let block = AsyncBlock::attach(Arc::clone(self));
        if let Err(e) = self
            .queue
            .run_completion(move || callback(&block), Duration::ZERO)
        {
            tracing::warn!(token = %self.token, error = %e, "Dropping completion callback");
        }
    }
}

impl Drop for BlockInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(op) = state.op.take() {
            tracing::debug!(
                token = %self.token,
                state = %state.tag,
                "Dropping operation of abandoned block"
            );
            drop(op);
        }
    }
}

/// Side effects of publication, performed after the state lock is released.
#[must_use]
struct Publication {
    cleanup: Option<Box<dyn Operation>>,
    keepalive: Option<Arc<BlockInner>>,
}

impl Publication {
    fn deliver(self, inner: &Arc<BlockInner>) {
        inner.notify.notify_waiters();
        drop(self.cleanup);
        inner.post_callback();
        drop(self.keepalive);
    }
}

/// One queued `do_work` pass. Fails the operation if dropped without running.
struct WorkItem {
    inner: Option<Arc<BlockInner>>,
}

impl WorkItem {
    fn run(mut self) {
        if let Some(inner) = self.inner.take() {
            work_pass(&inner);
        }
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tracing::debug!(token = %inner.token, "Scheduled work was canceled");
            fail_quietly(&inner, OpError::QueueTerminated);
        }
    }
}

fn submit_work(inner: &Arc<BlockInner>, delay: Duration) -> Result<(), OpError> {
    let item = WorkItem {
        inner: Some(Arc::clone(inner)),
    };
    inner.queue.run_work(move || item.run(), delay)
}

pub(crate) fn schedule(inner: &Arc<BlockInner>, delay: Duration) -> Result<(), OpError> {
    {
        let mut state = inner.lock();
        if state.tag.is_terminal() {
            return Err(OpError::Usage("operation already completed"));
        }
        inner.advance(&mut state, OperationTag::Scheduled)?;
    }
    submit_work(inner, delay)
}

pub(crate) fn finish(
    inner: &Arc<BlockInner>,
    result: Result<Completion, OpError>,
) -> Result<(), OpError> {
    let publication = {
        let mut state = inner.lock();
        if state.tag.is_terminal() {
            tracing::warn!(
                token = %inner.token,
                state = %state.tag,
                "Ignoring second completion of an operation"
            );
            return Err(OpError::Usage("operation already completed"));
        }
        let to = if result.is_ok() {
            OperationTag::Succeeded
        } else {
            OperationTag::Failed
        };
        inner.advance(&mut state, to)?;
        if let Err(e) = &result {
            tracing::debug!(token = %inner.token, error = %e, "Operation failed");
        }
        state.outcome = Some(result);
        if state.checked_out {
            None
        } else {
            Some(inner.publish(&mut state))
        }
    };
    if let Some(publication) = publication {
        publication.deliver(inner);
    }
    Ok(())
}

/// Fail unless a terminal status is already recorded.
fn fail_quietly(inner: &Arc<BlockInner>, error: OpError) {
    if inner.lock().tag.is_terminal() {
        tracing::debug!(token = %inner.token, error = %error, "Error after completion ignored");
        return;
    }
    let _ = finish(inner, Err(error));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

fn guarded<T>(
    token: CorrelationToken,
    capability: &'static str,
    f: impl FnOnce() -> Result<T, OpError>,
) -> Result<T, OpError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        tracing::warn!(
            %token,
            capability,
            panic = panic_message(payload.as_ref()),
            "Operation panicked"
        );
        Err(OpError::Unexpected)
    })
}

/// Check the operation out of its slot for a capability call.
fn check_out(state: &mut OpState) -> Option<Box<dyn Operation>> {
    let op = state.op.take()?;
    state.checked_out = true;
    Some(op)
}

/// Return a checked-out operation and flush whatever was deferred while it was away.
fn settle(inner: &Arc<BlockInner>, op: Box<dyn Operation>) {
    let (publication, resubmit) = {
        let mut state = inner.lock();
        state.checked_out = false;
        state.op = Some(op);
        let resubmit = mem::take(&mut state.deferred_work);
        if !state.tag.is_terminal() {
            (None, resubmit)
        } else if state.published {
            (None, 0)
        } else {
            (Some(inner.publish(&mut state)), 0)
        }
    };
    if let Some(publication) = publication {
        publication.deliver(inner);
    }
    for _ in 0..resubmit {
        if let Err(e) = submit_work(inner, Duration::ZERO) {
            tracing::debug!(token = %inner.token, error = %e, "Deferred work not resubmitted");
        }
    }
    let keepalive = {
        let mut state = inner.lock();
        inner.abandon(&mut state)
    };
    drop(keepalive);
}

/// Destroy an operation whose result has just been handed out.
fn retire(inner: &BlockInner, op: Box<dyn Operation>) {
    {
        let mut state = inner.lock();
        state.checked_out = false;
        let _ = inner.advance(&mut state, OperationTag::Destroyed);
    }
    drop(op);
}

fn work_pass(inner: &Arc<BlockInner>) {
    let mut op = {
        let mut state = inner.lock();
        if state.tag.is_terminal() {
            return;
        }
        if state.checked_out {
            state.deferred_work += 1;
            return;
        }
        if inner.advance(&mut state, OperationTag::Working).is_err() {
            return;
        }
        let Some(op) = check_out(&mut state) else {
            return;
        };
        op
    };

    let ctx = OpContext::new(Arc::clone(inner));
    match guarded(inner.token, "do_work", || op.do_work(&ctx)) {
        Ok(WorkStatus::Done) => {
            if !inner.lock().tag.is_terminal() {
                let _ = finish(inner, Ok(Completion::Bytes(0)));
            }
        }
        Ok(WorkStatus::Pending) => {}
        Err(e) => fail_quietly(inner, e),
    }
    settle(inner, op);
}

/// Move `op` into `block` and begin it on the calling thread.
///
/// A block runs at most one operation. If `begin` fails (or panics) the operation is failed,
/// cleaned up, and the error is returned here as well as through the block's status.
pub fn run<O: Operation>(block: &AsyncBlock, op: O) -> Result<(), OpError> {
    let inner = &block.inner;
    let mut op: Box<dyn Operation> = Box::new(op);
    {
        let mut state = inner.lock();
        if state.tag != OperationTag::Created {
            return Err(OpError::Usage("an operation has already run on this block"));
        }
        inner.advance(&mut state, OperationTag::Begun)?;
        state.checked_out = true;
        state.keepalive = Some(Arc::clone(inner));
    }

    let ctx = OpContext::new(Arc::clone(inner));
    let began = guarded(inner.token, "begin", || op.begin(&ctx));
    if let Err(e) = &began {
        fail_quietly(inner, e.clone());
    }
    settle(inner, op);
    began
}

/// The caller's handle on one asynchronous operation.
///
/// Cloning shares the same operation. See the module docs for lifetime rules.
pub struct AsyncBlock {
    inner: Arc<BlockInner>,
}

impl Clone for AsyncBlock {
    fn clone(&self) -> Self {
        Self::attach(Arc::clone(&self.inner))
    }
}

impl Drop for AsyncBlock {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.handles = state.handles.saturating_sub(1);
        let keepalive = self.inner.abandon(&mut state);
        drop(state);
        drop(keepalive);
    }
}

impl AsyncBlock {
    fn attach(inner: Arc<BlockInner>) -> Self {
        inner.lock().handles += 1;
        Self { inner }
    }

    /// A block bound to a duplicate of `queue`, with a fresh random correlation token.
    #[must_use]
    pub fn new(queue: &TaskQueue) -> Self {
        Self::with_token(queue, CorrelationToken::random())
    }

    #[must_use]
    pub fn with_token(queue: &TaskQueue, token: CorrelationToken) -> Self {
        Self::attach(Arc::new(BlockInner {
            queue: queue.clone(),
            token,
            callback: Mutex::new(None),
            state: Mutex::new(OpState {
                tag: OperationTag::Created,
                op: None,
                checked_out: false,
                outcome: None,
                published: false,
                cancel_requested: false,
                deferred_work: 0,
                empty_result_taken: false,
                handles: 0,
                completers: 0,
                keepalive: None,
            }),
            published: Condvar::new(),
            notify: Notify::new(),
        }))
    }

    /// Run `callback` on the queue's Completion port once the operation completes or fails.
    pub fn with_callback<F>(self, callback: F) -> Self
    where
        F: FnOnce(&AsyncBlock) + Send + 'static,
    {
        *self
            .inner
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.inner.queue
    }

    #[must_use]
    pub fn token(&self) -> CorrelationToken {
        self.inner.token
    }

    #[must_use]
    pub fn state(&self) -> OperationTag {
        self.inner.lock().tag
    }

    /// `Ok(())` once succeeded, the failure once failed, `Err(Pending)` before that.
    ///
    /// With `wait`, blocks the calling thread until the status is terminal. Never wait from a
    /// thread that must dispatch the operation's own Work port.
    pub fn get_status(&self, wait: bool) -> Result<(), OpError> {
        let mut state = self.inner.lock();
        if state.tag == OperationTag::Created {
            return Err(OpError::Usage("no operation has been run on this block"));
        }
        if wait {
            while !state.published {
                state = self
                    .inner
                    .published
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        status_of(&state)
    }

    /// Wait for a terminal status without blocking the executor.
    pub async fn wait_async(&self) -> Result<(), OpError> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            match self.get_status(false) {
                Err(OpError::Pending) => notified.await,
                other => return other,
            }
        }
    }

    pub fn get_result_size(&self) -> Result<usize, OpError> {
        let state = self.inner.lock();
        if state.tag == OperationTag::Created {
            return Err(OpError::Usage("no operation has been run on this block"));
        }
        status_of(&state)?;
        match state.outcome {
            Some(Ok(Completion::Bytes(size))) => Ok(size),
            _ => Err(OpError::Usage("operation produced a result handle, not bytes")),
        }
    }

    /// Copy the payload into `buffer`, which must be exactly [`Self::get_result_size`] bytes.
    ///
    /// Succeeds once per operation; the operation is cleaned up right after.
    pub fn get_result(&self, buffer: &mut [u8]) -> Result<(), OpError> {
        let inner = &self.inner;
        let mut op = {
            let mut state = inner.lock();
            if state.tag == OperationTag::Created {
                return Err(OpError::Usage("no operation has been run on this block"));
            }
            status_of(&state)?;
            let Some(Ok(Completion::Bytes(expected))) = state.outcome else {
                return Err(OpError::Usage("operation produced a result handle, not bytes"));
            };
            if buffer.len() != expected {
                return Err(OpError::ResultSizeMismatch {
                    expected,
                    actual: buffer.len(),
                });
            }
            if expected == 0 {
                if state.empty_result_taken {
                    return Err(OpError::Usage("result has already been retrieved"));
                }
                state.empty_result_taken = true;
                return Ok(());
            }
            if state.tag != OperationTag::Succeeded {
                return Err(OpError::Usage("result has already been retrieved"));
            }
            inner.advance(&mut state, OperationTag::ResultRetrieved)?;
            check_out(&mut state).ok_or(OpError::Unexpected)?
        };

        let result = guarded(inner.token, "get_result", || op.get_result(buffer));
        retire(inner, op);
        result
    }

    /// Take the typed result of an operation that completed with a handle.
    ///
    /// Succeeds once per operation; the operation is cleaned up right after.
    pub fn get_result_handle(&self) -> Result<ResultHandle, OpError> {
        let inner = &self.inner;
        let mut op = {
            let mut state = inner.lock();
            if state.tag == OperationTag::Created {
                return Err(OpError::Usage("no operation has been run on this block"));
            }
            status_of(&state)?;
            if !matches!(state.outcome, Some(Ok(Completion::Handle))) {
                return Err(OpError::Usage("operation produced bytes, not a result handle"));
            }
            if state.tag != OperationTag::Succeeded {
                return Err(OpError::Usage("result has already been retrieved"));
            }
            inner.advance(&mut state, OperationTag::ResultRetrieved)?;
            check_out(&mut state).ok_or(OpError::Unexpected)?
        };

        let result = guarded(inner.token, "take_result_handle", || op.take_result_handle());
        retire(inner, op);
        result
    }

    /// Ask the operation to stop.
    ///
    /// If the operation is idle its `cancel` capability decides right away; if a capability
    /// is running, the request is only visible through `is_cancel_requested`. No effect once
    /// the operation has finished.
    pub fn cancel(&self) {
        let inner = &self.inner;
        let mut op = {
            let mut state = inner.lock();
            if state.tag == OperationTag::Created || state.tag.is_terminal() {
                return;
            }
            state.cancel_requested = true;
            if state.checked_out {
                return;
            }
            let Some(op) = check_out(&mut state) else {
                return;
            };
            op
        };

        tracing::debug!(token = %inner.token, "Cancel requested");
        let ctx = OpContext::new(Arc::clone(inner));
        match guarded(inner.token, "cancel", || Ok(op.cancel(&ctx))) {
            Ok(CancelDecision::Abort) => fail_quietly(inner, OpError::Aborted),
            Ok(CancelDecision::Ignore) => {}
            Err(e) => fail_quietly(inner, e),
        }
        settle(inner, op);
    }
}

fn status_of(state: &OpState) -> Result<(), OpError> {
    if !state.published {
        return Err(OpError::Pending);
    }
    match &state.outcome {
        Some(Ok(_)) => Ok(()),
        Some(Err(e)) => Err(e.clone()),
        None => Err(OpError::Unexpected),
    }
}

impl fmt::Debug for AsyncBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBlock")
            .field("token", &self.inner.token)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
