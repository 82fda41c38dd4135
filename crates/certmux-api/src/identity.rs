//! Caller identity resolution
//!
//! The identity middleware reads the caller's user id from the `userId`
//! query parameter or, failing that, the `x-userid` header, and stores a
//! [`UserContext`] in the request extensions. Handlers that need a
//! caller use the [`RequireUser`] extractor.

use axum::{
    extract::{FromRequestParts, Query, Request},
    http::{HeaderMap, Uri, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;

const USER_ID_HEADER: &str = "x-userid";

/// The caller a request is made on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub user_name: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let user_name = user_id.to_uppercase();
        Self { user_id, user_name }
    }
}

#[derive(Deserialize)]
struct IdentityQuery {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Find the caller id in the query string or headers
fn resolve_user_id(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    let from_query = query
        .and_then(parse_identity_query)
        .and_then(|q| q.user_id)
        .filter(|id| !id.trim().is_empty());

    from_query.or_else(|| {
        headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

fn parse_identity_query(query: &str) -> Option<IdentityQuery> {
    let uri: Uri = format!("/?{}", query).parse().ok()?;
    Query::<IdentityQuery>::try_from_uri(&uri)
        .ok()
        .map(|Query(q)| q)
}

/// Middleware attaching a [`UserContext`] when the request names a caller
pub async fn resolve_identity(mut request: Request, next: Next) -> Response {
    if let Some(user_id) = resolve_user_id(request.uri().query(), request.headers()) {
        debug!("Resolved caller identity: {}", user_id);
        request.extensions_mut().insert(UserContext::new(user_id));
    }

    next.run(request).await
}

/// Extractor for the resolved caller (required)
pub struct RequireUser(pub UserContext);

impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .map(RequireUser)
            .ok_or_else(|| {
                ApiError::Unauthorized(
                    "Caller identity required (userId query parameter or x-userid header)"
                        .to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_name_is_upper_cased_id() {
        let user = UserContext::new("alice");
        assert_eq!(user.user_id, "alice");
        assert_eq!(user.user_name, "ALICE");
    }

    #[test]
    fn test_query_parameter_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("bob"));
        assert_eq!(
            resolve_user_id(Some("userId=alice&x=1"), &headers),
            Some("alice".to_string())
        );
    }

    #[test]
    fn test_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" bob "));
        assert_eq!(resolve_user_id(Some("x=1"), &headers), Some("bob".to_string()));
        assert_eq!(resolve_user_id(None, &headers), Some("bob".to_string()));
    }

    #[test]
    fn test_no_identity() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_user_id(None, &headers), None);
        assert_eq!(resolve_user_id(Some("userId="), &headers), None);
    }

    #[test]
    fn test_percent_encoded_query() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_user_id(Some("userId=team%20a"), &headers),
            Some("team a".to_string())
        );
    }
}
