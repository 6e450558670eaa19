//! HTTP transport for Errand.
//!
//! [`HttpTransport::make_post_request`] sends one JSON POST per [`RequestContext`], parses the
//! response envelope, and hands the finished context back to its callback according to the
//! transport's [`DeliveryMode`]:
//!
//! | Mode | Callback runs |
//! |------|---------------|
//! | `Threaded` | on the request queue's Completion port |
//! | `Polled` | on whichever thread calls [`HttpTransport::update`] |
//!
//! Response handling (status, body, envelope parse) happens on a worker queue derived from the
//! request's queue, so it never occupies the caller-facing Completion port.

mod http;
mod request;

use std::time::Duration;

use errand_config::TransportConfig;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;

pub use errand_config::DeliveryMode;
pub use http::HttpTransport;
pub use request::{RequestCallback, RequestContext};

/// Reports service errors as HTTP 200 with an in-body error code.
pub const REPORT_ERROR_AS_SUCCESS_HEADER: &str = "X-ReportErrorAsSuccess";
pub const SDK_VERSION_HEADER: &str = "X-SDK-Version";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

// TCP keepalive idle time; interval and retries use platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(
        SDK_VERSION_HEADER,
        HeaderValue::from_static(errand_types::SDK_VERSION),
    );
    headers.insert(
        REPORT_ERROR_AS_SUCCESS_HEADER,
        HeaderValue::from_static("true"),
    );
    headers
}

fn base_client_builder(config: &TransportConfig) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .redirect(Policy::none())
        .https_only(!config.allow_insecure_http)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers());

    match config.request_timeout {
        Some(timeout) => builder.timeout(timeout),
        None => builder,
    }
}

/// Build the HTTP client a transport uses.
pub fn http_client(config: &TransportConfig) -> Result<reqwest::Client, reqwest::Error> {
    base_client_builder(config).build()
}
