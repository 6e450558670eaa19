use std::time::Duration;

use errand_types::OpError;

use crate::context::OpContext;
use crate::handle::ResultHandle;

/// What `do_work` tells the runner about the operation after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Finished. Completes with an empty result unless the pass already completed or failed.
    Done,
    /// More to come: the pass re-scheduled itself or completion arrives from elsewhere.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelDecision {
    /// Keep running; the operation may still observe the request later.
    #[default]
    Ignore,
    /// Fail the operation with `OpError::Aborted`.
    Abort,
}

/// The capabilities an asynchronous operation plugs into the runner.
///
/// The runner owns the operation from [`run`](crate::run) until its single cleanup, which is
/// the operation's `Drop`. Capabilities are invoked one at a time and never concurrently.
/// A panic inside any of them is caught and recorded as [`OpError::Unexpected`].
pub trait Operation: Send + 'static {
    /// Start the operation. Must not block.
    fn begin(&mut self, ctx: &OpContext) -> Result<(), OpError> {
        ctx.schedule(Duration::ZERO)
    }

    /// Long-running work, invoked on the bound queue's Work port once per `schedule`.
    fn do_work(&mut self, _ctx: &OpContext) -> Result<WorkStatus, OpError> {
        Ok(WorkStatus::Done)
    }

    /// Copy the payload into `buffer`, whose length the runner has already checked against the
    /// size recorded at completion.
    ///
    /// Operations that complete with a non-zero size must override this.
    fn get_result(&mut self, buffer: &mut [u8]) -> Result<(), OpError> {
        tracing::error!(
            len = buffer.len(),
            "Operation completed with a payload but does not implement get_result"
        );
        Err(OpError::Unexpected)
    }

    /// Hand over the typed result of an operation that completed with
    /// `complete_with_handle`.
    fn take_result_handle(&mut self) -> Result<ResultHandle, OpError> {
        tracing::error!("Operation completed with a handle but does not implement take_result_handle");
        Err(OpError::Unexpected)
    }

    fn cancel(&mut self, _ctx: &OpContext) -> CancelDecision {
        CancelDecision::Ignore
    }
}
