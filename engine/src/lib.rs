//! Asynchronous operation runner.
//!
//! An [`Operation`] supplies capabilities (`begin`, `do_work`, `get_result`, `cancel`); the
//! runner owns it from [`run`] until its single cleanup and moves it through the lifecycle
//! described by [`OperationTag`]:
//!
//! ```text
//! Created -> Begun -> (Scheduled <-> Working)* -> Succeeded | Failed -> ResultRetrieved -> Destroyed
//! ```
//!
//! Callers observe progress through an [`AsyncBlock`]: a completion callback on the bound
//! queue's Completion port, [`AsyncBlock::get_status`], or [`AsyncBlock::wait_async`].
//! Typed results travel in a [`ResultHandle`] whose lifetime is independent of the operation.

mod block;
mod capability;
mod context;
mod handle;
mod operation;

pub use block::{AsyncBlock, BlockCallback, run};
pub use capability::{CancelDecision, Operation, WorkStatus};
pub use context::{Completer, OpContext};
pub use handle::{ResultHandle, close_handle, duplicate_handle};
pub use operation::{OperationEdge, OperationTag, is_legal_transition, transition_edge};

pub use errand_types::{CorrelationToken, OpError, StatusCode};
