//! Operation transition graph authority.
//!
//! This module is the single encoding point for named operation edges and their legality
//! checks. The runner in `block.rs` asks this module before every state change; operation
//! implementations never touch the state tag themselves.

use std::fmt;

/// Lifecycle position of the operation bound to an `AsyncBlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationTag {
    /// Block exists, nothing has been run on it yet.
    Created,
    Begun,
    Scheduled,
    Working,
    Succeeded,
    Failed,
    ResultRetrieved,
    /// The operation object has been dropped.
    Destroyed,
}

impl OperationTag {
    /// Whether a terminal status (success or failure) has been recorded.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::ResultRetrieved | Self::Destroyed
        )
    }
}

impl fmt::Display for OperationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationEdge {
    Begin,
    Schedule,
    StartWork,
    Complete,
    Fail,
    RetrieveResult,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransitionReceipt {
    from: OperationTag,
    edge: OperationEdge,
    to: OperationTag,
}

impl TransitionReceipt {
    #[must_use]
    pub(crate) const fn from(self) -> OperationTag {
        self.from
    }

    #[must_use]
    pub(crate) const fn edge(self) -> OperationEdge {
        self.edge
    }

    #[must_use]
    pub(crate) const fn to(self) -> OperationTag {
        self.to
    }
}

#[must_use]
pub(crate) fn transition_receipt(
    from: OperationTag,
    to: OperationTag,
) -> Option<TransitionReceipt> {
    transition_edge(from, to).map(|edge| TransitionReceipt { from, edge, to })
}

#[must_use]
pub(crate) fn receipt_is_legal(receipt: TransitionReceipt) -> bool {
    is_legal_transition(receipt.from, receipt.edge, receipt.to)
}

#[must_use]
pub fn transition_edge(from: OperationTag, to: OperationTag) -> Option<OperationEdge> {
    use OperationEdge::{Begin, Cleanup, Complete, Fail, RetrieveResult, Schedule, StartWork};
    use OperationTag::{
        Begun, Created, Destroyed, Failed, ResultRetrieved, Scheduled, Succeeded, Working,
    };

    match (from, to) {
        (Created, Begun) => Some(Begin),
        (Begun | Scheduled | Working, Scheduled) => Some(Schedule),
        (Scheduled | Working, Working) => Some(StartWork),
        (Begun | Scheduled | Working, Succeeded) => Some(Complete),
        (Begun | Scheduled | Working, Failed) => Some(Fail),
        (Succeeded, ResultRetrieved) => Some(RetrieveResult),
        (Succeeded | Failed | ResultRetrieved, Destroyed) => Some(Cleanup),
        _ => None,
    }
}

#[must_use]
pub fn is_legal_transition(from: OperationTag, edge: OperationEdge, to: OperationTag) -> bool {
    use OperationEdge::{Begin, Cleanup, Complete, Fail, RetrieveResult, Schedule, StartWork};
    use OperationTag::{
        Begun, Created, Destroyed, Failed, ResultRetrieved, Scheduled, Succeeded, Working,
    };

    match edge {
        Begin => from == Created && to == Begun,
        Schedule => matches!(from, Begun | Scheduled | Working) && to == Scheduled,
        StartWork => matches!(from, Scheduled | Working) && to == Working,
        Complete => matches!(from, Begun | Scheduled | Working) && to == Succeeded,
        Fail => matches!(from, Begun | Scheduled | Working) && to == Failed,
        RetrieveResult => from == Succeeded && to == ResultRetrieved,
        Cleanup => matches!(from, Succeeded | Failed | ResultRetrieved) && to == Destroyed,
    }
}
