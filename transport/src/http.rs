use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use errand_config::TransportConfig;
use errand_queue::TaskQueue;
use errand_types::OpError;

use crate::request::RequestContext;
use crate::{DeliveryMode, http_client};

#[derive(Default)]
struct PolledState {
    ready: VecDeque<RequestContext>,
    /// Submitted and not yet popped by `update`.
    in_flight: usize,
}

struct TransportInner {
    client: reqwest::Client,
    delivery: DeliveryMode,
    polled: Mutex<PolledState>,
}

impl TransportInner {
    fn polled(&self) -> MutexGuard<'_, PolledState> {
        self.polled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, mut ctx: RequestContext) {
        match self.delivery {
            DeliveryMode::Polled => {
                self.polled().ready.push_back(ctx);
            }
            DeliveryMode::Threaded => {
                let Some(callback) = ctx.take_callback() else {
                    return;
                };
                let queue = ctx.queue().clone();
                if let Err(e) = queue.run_completion(move || callback(ctx), Duration::ZERO) {
                    tracing::warn!(error = %e, "Dropping HTTP completion: request queue is gone");
                }
            }
        }
    }
}

/// Sends requests and delivers their results. Cloning shares the same transport.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<TransportInner>,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, OpError> {
        let client = http_client(config).map_err(|e| {
            tracing::error!("Failed to build HTTP client: {e}");
            OpError::Transport(e.to_string())
        })?;
        Ok(Self::with_client(client, config.delivery))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, delivery: DeliveryMode) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                client,
                delivery,
                polled: Mutex::new(PolledState::default()),
            }),
        }
    }

    #[must_use]
    pub fn delivery(&self) -> DeliveryMode {
        self.inner.delivery
    }

    /// Post `ctx` asynchronously.
    ///
    /// Returns `InvalidArgument` (dropping `ctx` without calling back) when the settings cannot
    /// produce a URL for its path. Any later failure is delivered through the callback like a
    /// response would be.
    pub fn make_post_request(&self, mut ctx: RequestContext) -> Result<(), OpError> {
        let url = ctx.settings().full_url(ctx.path()).map_err(|e| {
            tracing::warn!(path = ctx.path(), error = %e, "Rejecting request");
            OpError::InvalidArgument("request settings do not produce a valid URL")
        })?;

        if self.inner.delivery == DeliveryMode::Polled {
            self.inner.polled().in_flight += 1;
        }

        let mut builder = self.inner.client.post(url).body(ctx.body().to_string());
        for (name, value) in ctx.headers() {
            if !name.is_empty() && !value.is_empty() {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(path = ctx.path(), error = %e, "Failed to build request");
                ctx.record_transport_error(e.to_string());
                self.inner.deliver(ctx);
                return Ok(());
            }
        };

        let worker = match ctx.queue().derive_worker_queue() {
            Ok(worker) => worker,
            Err(e) => {
                ctx.record_transport_error(e.to_string());
                self.inner.deliver(ctx);
                return Ok(());
            }
        };

        tracing::debug!(path = ctx.path(), "Posting request");
        let inner = Arc::clone(&self.inner);
        let runtime = ctx.queue().runtime().clone();
        runtime.spawn(async move {
            let response = match inner.client.execute(request).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    response
                        .text()
                        .await
                        .map(|body| (status, body))
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            };
            complete_on_worker(inner, &worker, ctx, response);
        });
        Ok(())
    }

    /// Deliver at most one finished request on the calling thread.
    ///
    /// Returns how many requests are still outstanding (submitted, not yet delivered).
    /// Only valid in polled mode.
    pub fn update(&self) -> Result<usize, OpError> {
        if self.inner.delivery != DeliveryMode::Polled {
            return Err(OpError::Usage("update() is only valid with polled delivery"));
        }
        let (next, remaining) = {
            let mut polled = self.inner.polled();
            let next = polled.ready.pop_front();
            if next.is_some() {
                polled.in_flight = polled.in_flight.saturating_sub(1);
            }
            (next, polled.in_flight)
        };
        if let Some(ctx) = next {
            ctx.invoke();
        }
        Ok(remaining)
    }

    /// Finished requests waiting for `update` (polled mode).
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner.polled().ready.len()
    }

    /// Submitted requests not yet delivered through `update` (polled mode).
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.polled().in_flight
    }
}

/// A response waiting for its worker queue. Finished inline if the queue drops it unrun.
struct PendingResponse {
    inner: Arc<TransportInner>,
    response: Option<(RequestContext, Result<(u16, String), String>)>,
}

impl PendingResponse {
    fn finish(mut self) {
        if let Some((ctx, response)) = self.response.take() {
            finish_request(&self.inner, ctx, response);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some((ctx, response)) = self.response.take() {
            tracing::debug!(path = ctx.path(), "Worker queue unavailable, completing request inline");
            finish_request(&self.inner, ctx, response);
        }
    }
}

/// Record the response and deliver, on the derived worker queue when it still accepts work.
fn complete_on_worker(
    inner: Arc<TransportInner>,
    worker: &TaskQueue,
    ctx: RequestContext,
    response: Result<(u16, String), String>,
) {
    let pending = PendingResponse {
        inner,
        response: Some((ctx, response)),
    };
    // A rejected submission drops `pending`, which finishes the request here.
    if let Err(e) = worker.run_work(move || pending.finish(), Duration::ZERO) {
        tracing::debug!(error = %e, "Response handler not queued");
    }
}

fn finish_request(
    inner: &TransportInner,
    mut ctx: RequestContext,
    response: Result<(u16, String), String>,
) {
    match response {
        Ok((status, body)) => {
            ctx.record_response(status, body);
            tracing::debug!(
                path = ctx.path(),
                status,
                code = ctx.envelope().http_code,
                "Request finished"
            );
        }
        Err(error) => {
            tracing::warn!(path = ctx.path(), %error, "Request failed");
            ctx.record_transport_error(error);
        }
    }
    inner.deliver(ctx);
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("delivery", &self.inner.delivery)
            .finish_non_exhaustive()
    }
}
