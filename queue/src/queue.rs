use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use errand_types::OpError;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::port::{Entry, PortCore};
use crate::{Port, QueueOptions};

/// A callable submitted to a port.
pub type AsyncWork = Box<dyn FnOnce() + Send + 'static>;

/// Invoked once a terminated queue has fully drained.
pub type TerminatedCallback = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

static PROCESS_QUEUE: Mutex<Option<TaskQueue>> = Mutex::new(None);

/// Install (or clear, with `None`) the queue used by [`TaskQueue::create`] when no queue is
/// supplied. Returns the previously installed queue.
pub fn set_process_queue(queue: Option<TaskQueue>) -> Option<TaskQueue> {
    let mut slot = PROCESS_QUEUE.lock().unwrap_or_else(PoisonError::into_inner);
    mem::replace(&mut *slot, queue)
}

/// A duplicate of the process-default queue, if one is installed.
#[must_use]
pub fn process_queue() -> Option<TaskQueue> {
    PROCESS_QUEUE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Termination scope: everything submitted through one queue object.
///
/// `outstanding` counts items that are ready, delayed, or running. It reaches zero exactly
/// when every accepted submission has either run to completion or been canceled.
pub(crate) struct Scope {
    id: u64,
    runtime: Handle,
    state: Mutex<ScopeState>,
    drained: Condvar,
}

#[derive(Default)]
struct ScopeState {
    terminated: bool,
    outstanding: usize,
    next_timer: u64,
    timers: HashMap<u64, AbortHandle>,
    on_terminated: Vec<TerminatedCallback>,
    /// Scopes of queues derived from this one. They share this queue's Work port.
    derived: Vec<Weak<Scope>>,
}

/// What one scope gave up when it was terminated.
struct Canceled {
    timers: Vec<AbortHandle>,
    entries: Vec<Entry>,
    callbacks: Vec<TerminatedCallback>,
    derived: Vec<Arc<Scope>>,
}

impl Scope {
    fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            runtime,
            state: Mutex::new(ScopeState::default()),
            drained: Condvar::new(),
        })
    }

    // Lock order: scope state first, then any port.
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn finish_one(&self) {
        let callbacks = {
            let mut state = self.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            Self::drained_callbacks(&mut state, &self.drained)
        };
        for callback in callbacks {
            callback();
        }
    }

    fn drained_callbacks(state: &mut ScopeState, drained: &Condvar) -> Vec<TerminatedCallback> {
        if state.terminated && state.outstanding == 0 {
            drained.notify_all();
            mem::take(&mut state.on_terminated)
        } else {
            Vec::new()
        }
    }

    fn fire_timer(&self, timer: u64, entry: Entry, port: &Arc<PortCore>) {
        let rejected = {
            let mut state = self.lock();
            if state.timers.remove(&timer).is_some() {
                port.push(entry);
                None
            } else {
                // Terminate already canceled and accounted for this item.
                Some(entry)
            }
        };
        match rejected {
            None => port.kick(),
            Some(entry) => drop(entry),
        }
    }

    /// Mark terminated and pull every not-yet-started item of this scope off `ports`.
    ///
    /// Nothing is dropped or run here; the caller does that once every lock is released.
    fn cancel_pending(
        self: &Arc<Self>,
        ports: &[&Arc<PortCore>],
        on_terminated: Option<TerminatedCallback>,
    ) -> Canceled {
        let mut state = self.lock();
        state.terminated = true;

        let timers: Vec<AbortHandle> = state.timers.drain().map(|(_, t)| t).collect();
        let mut entries = Vec::new();
        for port in ports {
            entries.extend(port.take_scope(self));
        }
        state.outstanding = state
            .outstanding
            .saturating_sub(timers.len() + entries.len());

        if let Some(callback) = on_terminated {
            state.on_terminated.push(callback);
        }
        let derived = state.derived.drain(..).filter_map(|s| s.upgrade()).collect();
        let callbacks = Self::drained_callbacks(&mut state, &self.drained);
        Canceled {
            timers,
            entries,
            callbacks,
            derived,
        }
    }

    fn wait_drained(&self) {
        let mut state = self.lock();
        while state.outstanding > 0 {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct QueueInner {
    scope: Arc<Scope>,
    work: Arc<PortCore>,
    completion: Arc<PortCore>,
}

/// Cloneable handle to a dual-port task queue. See the crate docs.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create a queue whose ports dispatch according to `options`, timed by `runtime`.
    #[must_use]
    pub fn new(options: QueueOptions, runtime: Handle) -> Self {
        let work = PortCore::new(options.work, runtime.clone());
        let completion = PortCore::new(options.completion, runtime.clone());
        let scope = Scope::new(runtime);
        tracing::debug!(
            queue = scope.id,
            work = ?options.work,
            completion = ?options.completion,
            "Task queue created"
        );
        Self {
            inner: Arc::new(QueueInner {
                scope,
                work,
                completion,
            }),
        }
    }

    /// Create a queue on the runtime the caller is currently inside of.
    pub fn from_current_runtime(options: QueueOptions) -> Result<Self, OpError> {
        let runtime = Handle::try_current()
            .map_err(|_| OpError::Usage("no tokio runtime is active on this thread"))?;
        Ok(Self::new(options, runtime))
    }

    /// Duplicate `existing`, or fall back to the process-default queue.
    pub fn create(existing: Option<&TaskQueue>) -> Result<Self, OpError> {
        match existing {
            Some(queue) => Ok(queue.clone()),
            None => process_queue().ok_or(OpError::InvalidArgument(
                "no queue supplied and no process queue installed",
            )),
        }
    }

    /// Unique id of this queue's termination scope (for logs).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.scope.id
    }

    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.inner.scope.runtime
    }

    /// Number of live duplicates of this queue.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether both handles refer to the same queue object.
    #[must_use]
    pub fn ptr_eq(&self, other: &TaskQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.scope.lock().terminated
    }

    /// Ready (not yet started, not delayed) items currently waiting on `port`.
    #[must_use]
    pub fn pending(&self, port: Port) -> usize {
        self.port(port).len()
    }

    pub fn run_work<F>(&self, work: F, delay: Duration) -> Result<(), OpError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Port::Work, Box::new(work), delay)
    }

    pub fn run_completion<F>(&self, work: F, delay: Duration) -> Result<(), OpError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Port::Completion, Box::new(work), delay)
    }

    /// Enqueue `work` on `port` after `delay`. Never waits for `work` to run.
    pub fn submit(&self, port: Port, work: AsyncWork, delay: Duration) -> Result<(), OpError> {
        let target = Arc::clone(self.port(port));
        let scope = &self.inner.scope;
        {
            let mut state = scope.lock();
            if state.terminated {
                return Err(OpError::QueueTerminated);
            }
            state.outstanding += 1;
            let entry = Entry::new(Arc::clone(scope), work);

            if !delay.is_zero() {
                let timer = state.next_timer;
                state.next_timer += 1;
                let timer_scope = Arc::clone(scope);
                let timer_port = Arc::clone(&target);
                // Spawned under the scope lock so the timer cannot fire before it is registered.
                let task = scope.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    timer_scope.fire_timer(timer, entry, &timer_port);
                });
                state.timers.insert(timer, task.abort_handle());
                tracing::debug!(queue = scope.id, ?port, ?delay, "Delayed item scheduled");
                return Ok(());
            }

            target.push(entry);
        }
        target.kick();
        Ok(())
    }

    /// Run one ready item of `port` on the calling thread. Returns whether an item ran.
    pub fn dispatch(&self, port: Port) -> bool {
        self.port(port).run_next()
    }

    /// A queue whose Work and Completion ports both route to this queue's Work port.
    ///
    /// Terminating this queue also terminates every queue derived from it.
    pub fn derive_worker_queue(&self) -> Result<TaskQueue, OpError> {
        let scope = Scope::new(self.inner.scope.runtime.clone());
        {
            let mut state = self.inner.scope.lock();
            if state.terminated {
                return Err(OpError::QueueTerminated);
            }
            state.derived.retain(|s| s.strong_count() > 0);
            state.derived.push(Arc::downgrade(&scope));
        }
        tracing::debug!(
            queue = scope.id,
            source = self.inner.scope.id,
            "Derived worker queue"
        );
        Ok(Self {
            inner: Arc::new(QueueInner {
                scope,
                work: Arc::clone(&self.inner.work),
                completion: Arc::clone(&self.inner.work),
            }),
        })
    }

    /// Cancel everything submitted through this queue (or a queue derived from it) that has
    /// not started, reject further submissions, and run `on_terminated` once the remaining
    /// running items finish.
    ///
    /// With `wait`, blocks the calling thread until drained. Waiting from inside an item that
    /// was itself submitted through this queue never returns.
    pub fn terminate(
        &self,
        wait: bool,
        on_terminated: Option<TerminatedCallback>,
    ) -> Result<(), OpError> {
        let scope = &self.inner.scope;
        let shared = Arc::ptr_eq(&self.inner.work, &self.inner.completion);
        let ports: Vec<&Arc<PortCore>> = if shared {
            vec![&self.inner.work]
        } else {
            vec![&self.inner.work, &self.inner.completion]
        };

        let own = scope.cancel_pending(&ports, on_terminated);
        let mut timers = own.timers;
        let mut entries = own.entries;
        let mut callbacks = own.callbacks;

        // Derived queues (at any depth) only ever submit to this queue's Work port.
        let mut frontier = own.derived;
        let mut derived = Vec::new();
        while let Some(child) = frontier.pop() {
            let canceled = child.cancel_pending(&[&self.inner.work], None);
            timers.extend(canceled.timers);
            entries.extend(canceled.entries);
            callbacks.extend(canceled.callbacks);
            frontier.extend(canceled.derived);
            derived.push(child);
        }

        tracing::debug!(
            queue = scope.id,
            derived = derived.len(),
            canceled = entries.len() + timers.len(),
            "Task queue terminated"
        );
        for timer in timers {
            timer.abort();
        }
        drop(entries);
        for callback in callbacks {
            callback();
        }

        if wait {
            for child in &derived {
                child.wait_drained();
            }
            scope.wait_drained();
        }
        Ok(())
    }

    fn port(&self, port: Port) -> &Arc<PortCore> {
        match port {
            Port::Work => &self.inner.work,
            Port::Completion => &self.inner.completion,
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.inner.scope.id)
            .field("work", &self.inner.work.mode())
            .field("completion", &self.inner.completion.mode())
            .field("handles", &self.handle_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TaskQueue;
    use crate::{DispatchMode, Port, QueueOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn counter_item(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_port_runs_only_when_dispatched() {
        let queue = TaskQueue::new(QueueOptions::manual(), Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        queue.run_work(counter_item(&ran), Duration::ZERO).unwrap();
        queue.run_work(counter_item(&ran), Duration::ZERO).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(Port::Work), 2);

        assert!(queue.dispatch(Port::Work));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(queue.dispatch(Port::Work));
        assert!(!queue.dispatch(Port::Work));
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ports_are_independent() {
        let queue = TaskQueue::new(QueueOptions::manual(), Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        queue
            .run_completion(counter_item(&ran), Duration::ZERO)
            .unwrap();
        assert!(!queue.dispatch(Port::Work));
        assert!(queue.dispatch(Port::Completion));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn immediate_mode_runs_on_submitting_thread() {
        let options = QueueOptions {
            work: DispatchMode::Immediate,
            completion: DispatchMode::Manual,
        };
        let queue = TaskQueue::new(options, Handle::current());
        let caller = thread::current().id();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        queue
            .run_work(
                move || *sink.lock().unwrap() = Some(thread::current().id()),
                Duration::ZERO,
            )
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(caller));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn manual_dispatch_is_fifo() {
        let queue = TaskQueue::new(QueueOptions::manual(), Handle::current());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            queue
                .run_work(move || order.lock().unwrap().push(i), Duration::ZERO)
                .unwrap();
        }
        while queue.dispatch(Port::Work) {}
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn create_duplicates_supplied_queue() {
        let queue = TaskQueue::new(QueueOptions::manual(), Handle::current());
        assert_eq!(queue.handle_count(), 1);
        let dup = TaskQueue::create(Some(&queue)).unwrap();
        assert!(dup.ptr_eq(&queue));
        assert_eq!(queue.handle_count(), 2);
        drop(dup);
        assert_eq!(queue.handle_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn derived_queue_has_own_identity() {
        let queue = TaskQueue::new(QueueOptions::manual(), Handle::current());
        let derived = queue.derive_worker_queue().unwrap();
        assert!(!derived.ptr_eq(&queue));
        assert_ne!(derived.id(), queue.id());
    }
}
