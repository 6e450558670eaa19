use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use errand_queue::TaskQueue;
use errand_types::{CorrelationToken, OpError};

use crate::block::{self, BlockInner, Completion};

/// What a capability can do to the operation it belongs to.
///
/// Handed to every [`Operation`](crate::Operation) capability by reference. It cannot be
/// stored; use [`OpContext::completer`] for anything that must finish the operation later.
pub struct OpContext {
    inner: Arc<BlockInner>,
}

impl OpContext {
    pub(crate) fn new(inner: Arc<BlockInner>) -> Self {
        Self { inner }
    }

    /// The queue the operation is bound to.
    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        self.inner.queue()
    }

    #[must_use]
    pub fn token(&self) -> CorrelationToken {
        self.inner.token()
    }

    /// Queue one `do_work` pass on the Work port after `delay`. May be called repeatedly.
    pub fn schedule(&self, delay: Duration) -> Result<(), OpError> {
        block::schedule(&self.inner, delay)
    }

    /// Succeed with a `size`-byte payload, retrieved later through `get_result`.
    pub fn complete(&self, size: usize) -> Result<(), OpError> {
        block::finish(&self.inner, Ok(Completion::Bytes(size)))
    }

    /// Succeed with a typed payload, retrieved later through `take_result_handle`.
    pub fn complete_with_handle(&self) -> Result<(), OpError> {
        block::finish(&self.inner, Ok(Completion::Handle))
    }

    pub fn fail(&self, error: OpError) -> Result<(), OpError> {
        block::finish(&self.inner, Err(error))
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.is_cancel_requested()
    }

    /// A handle that can finish the operation later. While any completer is alive an
    /// operation whose caller dropped its `AsyncBlock` is kept running.
    #[must_use]
    pub fn completer(&self) -> Completer {
        self.inner.completer_created();
        Completer {
            inner: Arc::downgrade(&self.inner),
            token: self.inner.token(),
        }
    }
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("token", &self.inner.token())
            .finish_non_exhaustive()
    }
}

/// Finishes an operation from outside its capabilities, on any thread.
///
/// Holds the block weakly. Once the block is gone every call reports `Usage`.
///
/// An operation should not keep its own completer: that keeps an abandoned block alive.
pub struct Completer {
    inner: Weak<BlockInner>,
    token: CorrelationToken,
}

impl Clone for Completer {
    fn clone(&self) -> Self {
        if let Some(inner) = self.inner.upgrade() {
            inner.completer_created();
        }
        Self {
            inner: Weak::clone(&self.inner),
            token: self.token,
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.completer_dropped();
        }
    }
}

impl Completer {
    fn upgrade(&self) -> Result<Arc<BlockInner>, OpError> {
        self.inner.upgrade().ok_or_else(|| {
            tracing::warn!(token = %self.token, "Completion for an operation that no longer exists");
            OpError::Usage("operation no longer exists")
        })
    }

    #[must_use]
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    pub fn schedule(&self, delay: Duration) -> Result<(), OpError> {
        block::schedule(&self.upgrade()?, delay)
    }

    pub fn complete(&self, size: usize) -> Result<(), OpError> {
        block::finish(&self.upgrade()?, Ok(Completion::Bytes(size)))
    }

    pub fn complete_with_handle(&self) -> Result<(), OpError> {
        block::finish(&self.upgrade()?, Ok(Completion::Handle))
    }

    pub fn fail(&self, error: OpError) -> Result<(), OpError> {
        block::finish(&self.upgrade()?, Err(error))
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.is_cancel_requested())
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
