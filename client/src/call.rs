use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use errand_engine::{Completer, OpContext, OpError, Operation, ResultHandle};
use errand_transport::RequestContext;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::ClientInner;

/// Turns the envelope's `data` into a call's typed result.
pub(crate) type Decoder<R> = fn(&Value) -> Result<R, OpError>;

pub(crate) fn decode_data<R: DeserializeOwned>(data: &Value) -> Result<R, OpError> {
    Deserialize::deserialize(data).map_err(|e| OpError::Deserialize(e.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Finishes the operation exactly once.
///
/// Lives inside the request callback. If the transport drops the callback without running it
/// (its queue was terminated), the operation fails instead of hanging.
struct CompletionGuard {
    completer: Option<Completer>,
}

impl CompletionGuard {
    fn new(completer: Completer) -> Self {
        Self {
            completer: Some(completer),
        }
    }

    fn settle(mut self, finish: impl FnOnce(&Completer) -> Result<(), OpError>) {
        if let Some(completer) = self.completer.take()
            && let Err(e) = finish(&completer)
        {
            tracing::debug!(token = %completer.token(), error = %e, "API call result not recorded");
        }
    }

    fn complete(self, size: usize) {
        self.settle(|completer| completer.complete(size));
    }

    fn complete_with_handle(self) {
        self.settle(Completer::complete_with_handle);
    }

    fn fail(self, error: OpError) {
        self.settle(|completer| completer.fail(error));
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(completer) = self.completer.take() {
            tracing::warn!(token = %completer.token(), "API call response was never delivered");
            let _ = completer.fail(OpError::QueueTerminated);
        }
    }
}

/// The request half shared by every API-call operation.
struct PendingRequest {
    client: Option<Arc<ClientInner>>,
    path: String,
    body: String,
    headers: Vec<(String, String)>,
}

impl PendingRequest {
    fn new(client: Arc<ClientInner>, path: &str, body: String) -> Self {
        Self {
            client: Some(client),
            path: path.to_string(),
            body,
            headers: Vec::new(),
        }
    }

    /// Post the request. `on_done` receives the classified outcome on the delivery thread.
    ///
    /// The client context stays referenced until the response arrives.
    fn post<F>(&mut self, ctx: &OpContext, on_done: F) -> Result<(), OpError>
    where
        F: FnOnce(Result<&Value, OpError>, CompletionGuard) + Send + 'static,
    {
        let client = self
            .client
            .take()
            .ok_or(OpError::Usage("request has already been posted"))?;
        client.ensure_open()?;
        client.settings.full_url(&self.path).map_err(|e| {
            tracing::warn!(path = %self.path, error = %e, "Rejecting API call");
            OpError::InvalidArgument("request path is not valid for the configured endpoint")
        })?;

        let mut request = RequestContext::new(
            Arc::clone(&client.settings),
            ctx.queue().clone(),
            self.path.clone(),
            mem::take(&mut self.body),
        );
        for (name, value) in mem::take(&mut self.headers) {
            request = request.with_header(name, value);
        }

        let transport = client.transport.clone();
        let guard = CompletionGuard::new(ctx.completer());
        let request = request.on_complete(move |response| {
            drop(client);
            on_done(response.outcome(), guard);
        });

        tracing::debug!(token = %ctx.token(), path = %self.path, "Posting API call");
        transport.make_post_request(request)
    }
}

/// Calls an endpoint and decodes the envelope `data` into `R`.
///
/// Completes with a [`ResultHandle`] holding `Arc<R>`.
pub(crate) struct ApiCall<R> {
    request: PendingRequest,
    decode: Decoder<R>,
    result: Arc<Mutex<Option<Arc<R>>>>,
}

impl<R: DeserializeOwned + Send + Sync + 'static> ApiCall<R> {
    pub(crate) fn new(client: Arc<ClientInner>, path: &str, body: String) -> Self {
        Self::with_decoder(client, path, body, decode_data::<R>)
    }
}

impl<R: Send + Sync + 'static> ApiCall<R> {
    pub(crate) fn with_decoder(
        client: Arc<ClientInner>,
        path: &str,
        body: String,
        decode: Decoder<R>,
    ) -> Self {
        Self {
            request: PendingRequest::new(client, path, body),
            decode,
            result: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.request
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }
}

impl<R: Send + Sync + 'static> Operation for ApiCall<R> {
    fn begin(&mut self, ctx: &OpContext) -> Result<(), OpError> {
        let slot = Arc::clone(&self.result);
        let decode = self.decode;
        self.request.post(ctx, move |outcome, guard| {
            match outcome.and_then(decode) {
                Ok(value) => {
                    *lock(&slot) = Some(Arc::new(value));
                    guard.complete_with_handle();
                }
                Err(e) => guard.fail(e),
            }
        })
    }

    fn take_result_handle(&mut self) -> Result<ResultHandle, OpError> {
        lock(&self.result)
            .take()
            .map(ResultHandle::from_arc)
            .ok_or(OpError::Unexpected)
    }
}

/// Calls an endpoint and keeps the envelope `data` as serialized JSON bytes.
pub(crate) struct SerializedApiCall {
    request: PendingRequest,
    payload: Arc<Mutex<Vec<u8>>>,
}

impl SerializedApiCall {
    pub(crate) fn new(client: Arc<ClientInner>, path: &str, body: String) -> Self {
        Self {
            request: PendingRequest::new(client, path, body),
            payload: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.request
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }
}

impl Operation for SerializedApiCall {
    fn begin(&mut self, ctx: &OpContext) -> Result<(), OpError> {
        let payload = Arc::clone(&self.payload);
        self.request.post(ctx, move |outcome, guard| {
            let encoded = outcome.and_then(|data| {
                serde_json::to_vec(data).map_err(|e| OpError::Deserialize(e.to_string()))
            });
            match encoded {
                Ok(bytes) => {
                    let size = bytes.len();
                    *lock(&payload) = bytes;
                    guard.complete(size);
                }
                Err(e) => guard.fail(e),
            }
        })
    }

    fn get_result(&mut self, buffer: &mut [u8]) -> Result<(), OpError> {
        let payload = lock(&self.payload);
        if payload.len() != buffer.len() {
            return Err(OpError::ResultSizeMismatch {
                expected: payload.len(),
                actual: buffer.len(),
            });
        }
        buffer.copy_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::decode_data;
    use errand_engine::OpError;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct ServerTime {
        time: String,
    }

    #[test]
    fn data_decodes_into_typed_result() {
        let decoded: ServerTime = decode_data(&json!({"Time": "2026-10-19T00:00:00Z"})).unwrap();
        assert_eq!(decoded.time, "2026-10-19T00:00:00Z");
    }

    #[test]
    fn mismatched_data_is_a_deserialize_error() {
        let err = decode_data::<ServerTime>(&json!({"Other": 1})).unwrap_err();
        assert!(matches!(err, OpError::Deserialize(message) if message.contains("Time")));
    }
}
