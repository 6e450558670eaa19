//! Shared-ownership holder for typed operation results.
//!
//! A [`ResultHandle`] outlives the operation that produced it. Every duplicate shares the same
//! value; the value is dropped when the last duplicate is closed.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use errand_types::OpError;

#[derive(Clone)]
pub struct ResultHandle {
    value: Arc<dyn Any + Send + Sync>,
}

impl ResultHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
        }
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self { value }
    }

    /// Borrow the held value if it is a `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Share the held value as an `Arc<T>` independent of this handle.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Release this share. The value is dropped if it was the last one.
    pub fn close(self) {}

    #[must_use]
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.value)
    }
}

impl fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("shares", &self.share_count())
            .finish_non_exhaustive()
    }
}

/// Duplicate a handle that may be absent.
pub fn duplicate_handle(handle: Option<&ResultHandle>) -> Result<ResultHandle, OpError> {
    handle
        .map(ResultHandle::duplicate)
        .ok_or(OpError::InvalidArgument("result handle is missing"))
}

pub fn close_handle(handle: ResultHandle) {
    handle.close();
}
