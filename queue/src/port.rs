//! A single dispatch port: a FIFO of ready items plus the policy that drains it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;

use crate::DispatchMode;
use crate::queue::{AsyncWork, Scope};

/// A submitted callable together with the scope that accounts for it.
pub(crate) struct Entry {
    scope: Arc<Scope>,
    work: AsyncWork,
}

impl Entry {
    pub(crate) fn new(scope: Arc<Scope>, work: AsyncWork) -> Self {
        Self { scope, work }
    }

    pub(crate) fn belongs_to(&self, scope: &Arc<Scope>) -> bool {
        Arc::ptr_eq(&self.scope, scope)
    }

    fn run(self) {
        let Entry { scope, work } = self;
        // Accounted as finished even if `work` unwinds.
        let _finished = FinishGuard(scope);
        work();
    }
}

struct FinishGuard(Arc<Scope>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

pub(crate) struct PortCore {
    mode: DispatchMode,
    runtime: Handle,
    ready: Mutex<VecDeque<Entry>>,
}

impl PortCore {
    pub(crate) fn new(mode: DispatchMode, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            mode,
            runtime,
            ready: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn mode(&self) -> DispatchMode {
        self.mode
    }

    fn ready(&self) -> MutexGuard<'_, VecDeque<Entry>> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue without running anything. Callers hold the owning scope's lock.
    pub(crate) fn push(&self, entry: Entry) {
        self.ready().push_back(entry);
    }

    /// Drive one item according to the port's mode. Must be called without any scope lock.
    pub(crate) fn kick(self: &Arc<Self>) {
        match self.mode {
            DispatchMode::ThreadPool => {
                let port = Arc::clone(self);
                drop(self.runtime.spawn_blocking(move || {
                    port.run_next();
                }));
            }
            DispatchMode::Immediate => {
                self.run_next();
            }
            DispatchMode::Manual => {}
        }
    }

    /// Pop and run the oldest ready item on the calling thread.
    pub(crate) fn run_next(&self) -> bool {
        let next = self.ready().pop_front();
        match next {
            Some(entry) => {
                entry.run();
                true
            }
            None => false,
        }
    }

    /// Remove every not-yet-started item that belongs to `scope`.
    ///
    /// The removed entries are returned so the caller can drop them after releasing its locks.
    pub(crate) fn take_scope(&self, scope: &Arc<Scope>) -> Vec<Entry> {
        let mut ready = self.ready();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(ready.len());
        for entry in ready.drain(..) {
            if entry.belongs_to(scope) {
                taken.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        *ready = kept;
        taken
    }

    pub(crate) fn len(&self) -> usize {
        self.ready().len()
    }
}
