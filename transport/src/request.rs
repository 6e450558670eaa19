use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use errand_config::ServiceSettings;
use errand_queue::TaskQueue;
use errand_types::{ErrorEnvelope, OpError};
use serde_json::Value;

/// Invoked once with the finished request context.
pub type RequestCallback = Box<dyn FnOnce(RequestContext) + Send + 'static>;

/// One HTTP call: everything needed to send it, and everything that came back.
///
/// Moved into [`HttpTransport::make_post_request`](crate::HttpTransport::make_post_request) and
/// handed back, filled in, to its callback.
pub struct RequestContext {
    path: String,
    body: String,
    headers: BTreeMap<String, String>,
    settings: Arc<ServiceSettings>,
    queue: TaskQueue,
    callback: Option<RequestCallback>,
    http_status: Option<u16>,
    response_body: String,
    envelope: ErrorEnvelope,
    transport_error: Option<String>,
}

impl RequestContext {
    /// A request posting `body` (serialized JSON) to `path` under `settings`' endpoint.
    ///
    /// Delivery happens through `queue`.
    pub fn new(
        settings: Arc<ServiceSettings>,
        queue: TaskQueue,
        path: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
            headers: BTreeMap::new(),
            settings,
            queue,
            callback: None,
            http_status: None,
            response_body: String::new(),
            envelope: ErrorEnvelope::default(),
            transport_error: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(RequestContext) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<ServiceSettings> {
        &self.settings
    }

    #[must_use]
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// HTTP status of the response, if one arrived.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    #[must_use]
    pub fn response_body(&self) -> &str {
        &self.response_body
    }

    #[must_use]
    pub fn envelope(&self) -> &ErrorEnvelope {
        &self.envelope
    }

    /// Why the call never produced a response, if it didn't.
    #[must_use]
    pub fn transport_error(&self) -> Option<&str> {
        self.transport_error.as_deref()
    }

    /// Classify the finished call; on success, the envelope's `data`.
    pub fn outcome(&self) -> Result<&Value, OpError> {
        if let Some(error) = &self.transport_error {
            return Err(OpError::Transport(error.clone()));
        }
        match self.envelope.failure() {
            Some(error) => Err(error),
            None => Ok(&self.envelope.data),
        }
    }

    pub(crate) fn record_response(&mut self, http_status: u16, body: String) {
        self.envelope = ErrorEnvelope::from_response(http_status, &body);
        self.http_status = Some(http_status);
        self.response_body = body;
    }

    pub(crate) fn record_transport_error(&mut self, error: String) {
        self.envelope = ErrorEnvelope::connection_failure(error.clone());
        self.transport_error = Some(error);
    }

    pub(crate) fn take_callback(&mut self) -> Option<RequestCallback> {
        self.callback.take()
    }

    /// Hand the context to its callback, if it has one.
    pub(crate) fn invoke(mut self) {
        if let Some(callback) = self.take_callback() {
            callback(self);
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.path)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("http_status", &self.http_status)
            .field("transport_error", &self.transport_error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::RequestContext;
    use errand_config::ServiceSettings;
    use errand_queue::{QueueOptions, TaskQueue};
    use errand_types::OpError;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::runtime::Builder;

    fn context() -> RequestContext {
        let runtime = Builder::new_current_thread().build().unwrap();
        let settings =
            Arc::new(ServiceSettings::new("T1", "https://t1.example.com", false).unwrap());
        RequestContext::new(
            settings,
            TaskQueue::new(QueueOptions::manual(), runtime.handle().clone()),
            "/Client/GetTime",
            "{}",
        )
    }

    #[test]
    fn transport_error_wins_over_envelope() {
        let mut ctx = context();
        ctx.record_transport_error("connection refused".into());
        assert_eq!(
            ctx.outcome(),
            Err(OpError::Transport("connection refused".into()))
        );
        assert_eq!(ctx.http_status(), None);
    }

    #[test]
    fn success_envelope_yields_data() {
        let mut ctx = context();
        ctx.record_response(200, r#"{"code":200,"status":"OK","data":{"X":1}}"#.into());
        assert_eq!(ctx.outcome(), Ok(&json!({"X": 1})));
    }

    #[test]
    fn non_json_body_is_partial_failure() {
        let mut ctx = context();
        ctx.record_response(502, "<html>Bad Gateway</html>".into());
        assert!(matches!(ctx.outcome(), Err(OpError::PartialFailure(_))));
        assert_eq!(ctx.envelope().http_code, 502);
        assert_eq!(ctx.envelope().http_status, "<html>Bad Gateway</html>");
    }

    #[test]
    fn remote_error_is_classified() {
        let mut ctx = context();
        ctx.record_response(
            200,
            r#"{"code":401,"status":"Unauthorized","error":"NotAuthenticated","errorCode":1074,"errorMessage":"no session"}"#.into(),
        );
        assert!(matches!(
            ctx.outcome(),
            Err(OpError::Remote {
                http_code: 401,
                error_code: 1074,
                ..
            })
        ));
    }
}
