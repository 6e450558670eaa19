//! Dual-port task queue.
//!
//! A [`TaskQueue`] is an execution context with two independent ports:
//!
//! - [`Port::Work`] - where operations run their (possibly long) work items
//! - [`Port::Completion`] - where callers are notified that an operation finished
//!
//! Each port has a [`DispatchMode`] deciding *who* runs queued items:
//!
//! | Mode | Runs on |
//! |------|---------|
//! | `ThreadPool` | the tokio blocking pool of the queue's runtime |
//! | `Manual` | whichever thread calls [`TaskQueue::dispatch`] |
//! | `Immediate` | the submitting thread, right after the item is enqueued |
//!
//! The queue never creates threads of its own. Delayed submissions are timed by the tokio
//! runtime handed to [`TaskQueue::new`].
//!
//! # Ownership
//!
//! `TaskQueue` is a cheap clone: every clone is an equally valid duplicate of the same
//! queue, and the queue stays usable as long as one clone is alive.
//!
//! # Derived queues
//!
//! [`TaskQueue::derive_worker_queue`] returns a queue whose Work *and* Completion ports both
//! feed this queue's Work port. Completions raised through a derived queue therefore never
//! occupy the caller-facing completion port. A derived queue has its own termination scope:
//! terminating it cancels only what was submitted through it.

mod port;
mod queue;

pub use queue::{AsyncWork, TaskQueue, TerminatedCallback, process_queue, set_process_queue};

/// One of the two scheduling channels of a [`TaskQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Work,
    Completion,
}

/// How queued items on a port get executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    ThreadPool,
    Manual,
    Immediate,
}

/// Dispatch mode per port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    pub work: DispatchMode,
    pub completion: DispatchMode,
}

impl QueueOptions {
    /// Both ports on the runtime's blocking pool.
    #[must_use]
    pub const fn thread_pool() -> Self {
        Self {
            work: DispatchMode::ThreadPool,
            completion: DispatchMode::ThreadPool,
        }
    }

    /// Both ports dispatched by the caller.
    #[must_use]
    pub const fn manual() -> Self {
        Self {
            work: DispatchMode::Manual,
            completion: DispatchMode::Manual,
        }
    }

    /// Work on the blocking pool, completions dispatched by the caller.
    ///
    /// This is the usual shape for a game-loop style host that wants callbacks on its own
    /// thread.
    #[must_use]
    pub const fn manual_completion() -> Self {
        Self {
            work: DispatchMode::ThreadPool,
            completion: DispatchMode::Manual,
        }
    }
}
