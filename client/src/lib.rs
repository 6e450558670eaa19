//! Client surface for Errand.
//!
//! A [`ClientContext`] bundles validated service settings with an [`HttpTransport`]. Every
//! call it issues is an [`Operation`](errand_engine::Operation) run on a caller-supplied
//! [`AsyncBlock`]:
//!
//! - [`ClientContext::call`]: typed result, retrieved with `get_result_handle`
//! - [`ClientContext::call_serialized`]: JSON bytes, retrieved with `get_result`
//! - [`ClientContext::login_with_custom_id`]: a [`LoginResult`], turned into a [`User`] whose
//!   calls carry the session ticket
//! - [`ClientContext::cleanup_async`]: closes the context once nothing else uses it
//!
//! ```no_run
//! # use errand_client::{ClientContext, LoginResult, LoginWithCustomIdRequest};
//! # use errand_engine::AsyncBlock;
//! # fn demo(client: &ClientContext, block: &AsyncBlock) -> Result<(), errand_engine::OpError> {
//! client.login_with_custom_id(block, &LoginWithCustomIdRequest::new("player-1"))?;
//! block.get_status(true)?;
//! let handle = block.get_result_handle()?;
//! let user = client.user(handle.get::<LoginResult>().expect("login result"));
//! println!("logged in as {}", user.player_id());
//! # Ok(())
//! # }
//! ```
//!
//! [`HttpTransport`]: errand_transport::HttpTransport
//! [`AsyncBlock`]: errand_engine::AsyncBlock

mod call;
mod cleanup;
mod context;
mod login;

pub use context::ClientContext;
pub use login::{
    AUTHORIZATION_HEADER, LOGIN_WITH_CUSTOM_ID_PATH, LoginResult, LoginWithCustomIdRequest, User,
};
