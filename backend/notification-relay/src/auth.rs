/// Authentication seam for incoming streaming connections
///
/// The relay only consumes this interface: an authenticator turns a request
/// into the channel the connection should be registered under.
use actix_web::{web, HttpRequest};
use serde::Deserialize;
use thiserror::Error;

use crate::models::ChannelId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("malformed query string: {0}")]
    MalformedQuery(String),
}

pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, req: &HttpRequest) -> Result<ChannelId, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

/// Uses the `token` query parameter verbatim as the channel ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTokenAuthenticator;

impl Authenticator for QueryTokenAuthenticator {
    fn authenticate(&self, req: &HttpRequest) -> Result<ChannelId, AuthError> {
        let query = web::Query::<TokenQuery>::from_query(req.query_string())
            .map_err(|e| AuthError::MalformedQuery(e.to_string()))?;

        if query.token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        Ok(ChannelId::new(query.into_inner().token))
    }
}
