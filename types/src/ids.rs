use std::fmt;

use uuid::Uuid;

/// Caller-supplied token that follows one operation through logs and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// A token derived from a fresh v4 UUID, for callers that do not track their own.
    #[must_use]
    pub fn random() -> Self {
        let (high, low) = Uuid::new_v4().as_u64_pair();
        Self(high ^ low)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
