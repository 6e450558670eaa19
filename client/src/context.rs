use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use errand_config::{ResolvedConfig, ServiceSettings};
use errand_engine::{AsyncBlock, OpError, run};
use errand_transport::HttpTransport;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::call::{ApiCall, SerializedApiCall};
use crate::cleanup::Cleanup;
use crate::login::{LOGIN_WITH_CUSTOM_ID_PATH, LoginResult, LoginWithCustomIdRequest, User};

pub(crate) struct ClientInner {
    pub(crate) settings: Arc<ServiceSettings>,
    pub(crate) transport: HttpTransport,
    closed: AtomicBool,
}

impl ClientInner {
    pub(crate) fn ensure_open(&self) -> Result<(), OpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OpError::Usage("client context has been cleaned up"));
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Settings plus transport, shared by every call issued through it.
///
/// Cloning is cheap and shares the same context. Each in-flight call also holds a share,
/// so [`ClientContext::cleanup_async`] only succeeds once the caller's clone is the last one.
#[derive(Clone)]
pub struct ClientContext {
    inner: Arc<ClientInner>,
}

impl ClientContext {
    #[must_use]
    pub fn new(settings: ServiceSettings, transport: HttpTransport) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                settings: Arc::new(settings),
                transport,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build the transport described by `config` and wrap it with the service settings.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, OpError> {
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::new(config.service.clone(), transport))
    }

    #[must_use]
    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn transport(&self) -> &HttpTransport {
        &self.inner.transport
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Owners of this context besides `self`: other clones, users, and in-flight calls.
    #[must_use]
    pub fn other_references(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    /// POST `body` to `path`; the envelope's `data` decodes into `R`.
    ///
    /// Retrieve the result with [`AsyncBlock::get_result_handle`]; the handle holds an `Arc<R>`.
    pub fn call<R, B>(&self, block: &AsyncBlock, path: &str, body: &B) -> Result<(), OpError>
    where
        R: DeserializeOwned + Send + Sync + 'static,
        B: Serialize + ?Sized,
    {
        let body = encode_body(body)?;
        run(block, ApiCall::<R>::new(Arc::clone(&self.inner), path, body))
    }

    /// POST an already serialized body to `path`; the result is the envelope's `data` as JSON
    /// bytes, read with [`AsyncBlock::get_result_size`] and [`AsyncBlock::get_result`].
    pub fn call_serialized(
        &self,
        block: &AsyncBlock,
        path: &str,
        body: impl Into<String>,
    ) -> Result<(), OpError> {
        run(
            block,
            SerializedApiCall::new(Arc::clone(&self.inner), path, body.into()),
        )
    }

    /// Log in with a caller-chosen custom id. `TitleId` is filled in from the settings when the
    /// request leaves it unset.
    ///
    /// The result handle holds an `Arc<LoginResult>`; pass it to [`ClientContext::user`].
    pub fn login_with_custom_id(
        &self,
        block: &AsyncBlock,
        request: &LoginWithCustomIdRequest,
    ) -> Result<(), OpError> {
        let mut request = request.clone();
        if request.title_id.is_none() {
            request.title_id = Some(self.inner.settings.title_id().to_string());
        }
        let body = encode_body(&request)?;
        let call = ApiCall::with_decoder(
            Arc::clone(&self.inner),
            LOGIN_WITH_CUSTOM_ID_PATH,
            body,
            LoginResult::from_data,
        );
        run(block, call)
    }

    /// The authenticated view of this context for a finished login.
    #[must_use]
    pub fn user(&self, login: &LoginResult) -> User {
        User::new(self.clone(), login)
    }

    /// Tear the context down once nothing else references it.
    ///
    /// Fails with [`OpError::ContextInUse`] while other clones, users, or in-flight calls are
    /// alive; retry after they finish. On success every later call through any handle to this
    /// context fails with `Usage`.
    pub fn cleanup_async(&self, block: &AsyncBlock) -> Result<(), OpError> {
        run(block, Cleanup::new(Arc::clone(&self.inner)))
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("title_id", &self.inner.settings.title_id())
            .field("endpoint", &self.inner.settings.endpoint().as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

pub(crate) fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<String, OpError> {
    serde_json::to_string(body).map_err(|e| {
        tracing::warn!(error = %e, "Request body failed to serialize");
        OpError::InvalidArgument("request body is not serializable")
    })
}
