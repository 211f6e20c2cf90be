//! Routing of WebSocket upgrade requests.
//!
//! | path                  | route                              |
//! |-----------------------|------------------------------------|
//! | `/documents/<key>`    | document session for `<key>`       |
//! | `/branch-config/<key>`| configuration broadcast for branch |
//! | anything else         | refused with 404                   |
//!
//! Keys are percent-decoded and may contain `/`.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::form_urlencoded;

use crate::presence::Participant;
use crate::protocol::{ParticipantId, UserIdentity};

const DOCUMENTS_PREFIX: &str = "/documents/";
const BRANCH_CONFIG_PREFIX: &str = "/branch-config/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no route for {0}")]
    UnknownRoute(String),

    #[error("empty key in {0}")]
    EmptyKey(String),

    #[error("key in {0} is not valid UTF-8")]
    InvalidEncoding(String),
}

/// Identity supplied on the query string of a document connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinParams {
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub color: Option<String>,
}

impl JoinParams {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match name.as_ref() {
                "userId" => params.user_id = value,
                "name" => params.name = value,
                "avatarUrl" => params.avatar_url = value,
                "color" => params.color = value,
                _ => {}
            }
        }
        params
    }

    /// Build the participant for a new connection.
    pub fn into_participant(self, id: ParticipantId) -> Participant {
        let user = UserIdentity {
            id: self.user_id.unwrap_or_else(|| id.to_string()),
            name: self.name.unwrap_or_else(|| "Anonymous".to_string()),
            avatar_url: self.avatar_url.unwrap_or_default(),
        };
        Participant::new(id, user, self.color)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Document { key: String, params: JoinParams },
    BranchConfig { branch: String },
}

/// Resolve an upgrade request path and query string.
pub fn route(path: &str, query: Option<&str>) -> Result<Route, DispatchError> {
    if let Some(rest) = path.strip_prefix(DOCUMENTS_PREFIX) {
        let key = decode_key(path, rest)?;
        return Ok(Route::Document {
            key,
            params: JoinParams::from_query(query),
        });
    }
    if let Some(rest) = path.strip_prefix(BRANCH_CONFIG_PREFIX) {
        let branch = decode_key(path, rest)?;
        return Ok(Route::BranchConfig { branch });
    }
    Err(DispatchError::UnknownRoute(path.to_string()))
}

fn decode_key(path: &str, raw: &str) -> Result<String, DispatchError> {
    let key = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| DispatchError::InvalidEncoding(path.to_string()))?;
    if key.is_empty() {
        return Err(DispatchError::EmptyKey(path.to_string()));
    }
    Ok(key.into_owned())
}
