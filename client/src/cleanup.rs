use std::sync::Arc;
use std::time::Duration;

use errand_engine::{OpContext, OpError, Operation};

use crate::context::ClientInner;

/// Closes a client context once the caller holds the last reference.
pub(crate) struct Cleanup {
    client: Option<Arc<ClientInner>>,
}

impl Cleanup {
    pub(crate) fn new(client: Arc<ClientInner>) -> Self {
        Self {
            client: Some(client),
        }
    }
}

impl Operation for Cleanup {
    fn begin(&mut self, ctx: &OpContext) -> Result<(), OpError> {
        let client = self
            .client
            .take()
            .ok_or(OpError::Usage("cleanup has already begun"))?;
        client.ensure_open()?;

        // The caller's context and this operation account for two shares.
        let live = Arc::strong_count(&client).saturating_sub(2);
        if live > 0 {
            tracing::debug!(token = %ctx.token(), live, "Client context still in use");
            return Err(OpError::ContextInUse { live });
        }
        client.close();
        drop(client);

        let completer = ctx.completer();
        let worker = ctx.queue().derive_worker_queue()?;
        worker.run_work(
            move || {
                tracing::debug!(token = %completer.token(), "Client context closed");
                if let Err(e) = completer.complete(0) {
                    tracing::debug!(error = %e, "Cleanup completion not recorded");
                }
            },
            Duration::ZERO,
        )
    }
}
