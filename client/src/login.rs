use std::fmt;
use std::sync::Arc;

use errand_engine::{AsyncBlock, OpError, run};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::{ApiCall, SerializedApiCall};
use crate::context::{ClientContext, encode_body};

pub const LOGIN_WITH_CUSTOM_ID_PATH: &str = "/Client/LoginWithCustomID";

/// Session header attached to every call made through a [`User`].
pub const AUTHORIZATION_HEADER: &str = "X-Authorization";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginWithCustomIdRequest {
    pub custom_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_account: Option<bool>,
    /// Filled in from the client settings when left unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_id: Option<String>,
}

impl LoginWithCustomIdRequest {
    pub fn new(custom_id: impl Into<String>) -> Self {
        Self {
            custom_id: custom_id.into(),
            ..Self::default()
        }
    }

    pub fn create_account(mut self, create: bool) -> Self {
        self.create_account = Some(create);
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginData {
    #[serde(rename = "PlayFabId")]
    player_id: String,
    session_ticket: String,
    #[serde(default)]
    newly_created: bool,
}

#[derive(Clone, PartialEq)]
pub struct LoginResult {
    pub player_id: String,
    pub session_ticket: String,
    pub newly_created: bool,
    /// The full envelope `data`, including fields not surfaced above.
    pub data: Value,
}

impl LoginResult {
    pub(crate) fn from_data(data: &Value) -> Result<Self, OpError> {
        let login =
            LoginData::deserialize(data).map_err(|e| OpError::Deserialize(e.to_string()))?;
        if login.session_ticket.is_empty() {
            return Err(OpError::Deserialize(
                "login response carries an empty SessionTicket".to_string(),
            ));
        }
        Ok(Self {
            player_id: login.player_id,
            session_ticket: login.session_ticket,
            newly_created: login.newly_created,
            data: data.clone(),
        })
    }
}

impl fmt::Debug for LoginResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResult")
            .field("player_id", &self.player_id)
            .field("newly_created", &self.newly_created)
            .finish_non_exhaustive()
    }
}

/// A logged-in player. Calls made through it carry the session ticket.
///
/// Holds a share of its [`ClientContext`]; drop it before cleaning the context up.
#[derive(Clone)]
pub struct User {
    client: ClientContext,
    player_id: String,
    session_ticket: String,
}

impl User {
    pub(crate) fn new(client: ClientContext, login: &LoginResult) -> Self {
        Self {
            client,
            player_id: login.player_id.clone(),
            session_ticket: login.session_ticket.clone(),
        }
    }

    #[must_use]
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    #[must_use]
    pub fn session_ticket(&self) -> &str {
        &self.session_ticket
    }

    /// Authenticated form of [`ClientContext::call`].
    pub fn call<R, B>(&self, block: &AsyncBlock, path: &str, body: &B) -> Result<(), OpError>
    where
        R: DeserializeOwned + Send + Sync + 'static,
        B: Serialize + ?Sized,
    {
        let body = encode_body(body)?;
        let call = ApiCall::<R>::new(Arc::clone(self.client.inner()), path, body)
            .with_header(AUTHORIZATION_HEADER, &self.session_ticket);
        run(block, call)
    }

    /// Authenticated form of [`ClientContext::call_serialized`].
    pub fn call_serialized(
        &self,
        block: &AsyncBlock,
        path: &str,
        body: impl Into<String>,
    ) -> Result<(), OpError> {
        let call = SerializedApiCall::new(Arc::clone(self.client.inner()), path, body.into())
            .with_header(AUTHORIZATION_HEADER, &self.session_ticket);
        run(block, call)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("player_id", &self.player_id)
            .finish_non_exhaustive()
    }
}
