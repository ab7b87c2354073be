use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::{Identity, TokenService};
use crate::error::{AppError, AppResult};
use crate::storage::{CredentialStore, StoreError};

/// Resolves `Authorization: Bearer <token>` to an `Identity` for every request
/// outside the public paths.
#[derive(Clone)]
pub struct SessionBinder {
    tokens: Arc<TokenService>,
    users: Arc<dyn CredentialStore>,
    public_paths: Arc<HashSet<String>>,
}

impl SessionBinder {
    pub fn new<I, P>(tokens: Arc<TokenService>, users: Arc<dyn CredentialStore>, public_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let public_paths: HashSet<String> = public_paths.into_iter().map(Into::into).collect();
        Self { tokens, users, public_paths: Arc::new(public_paths) }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.contains(path)
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> AppResult<Identity> {
        let Some(raw) = headers.get(header::AUTHORIZATION) else {
            return Err(AppError::auth("missing_authorization", "authorization header is missing"));
        };
        let token = raw
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::auth("invalid_authorization", "invalid authorization header"))?;

        let user_id = match self.tokens.verify(token) {
            Ok(id) => id,
            Err(e) => {
                warn!(target: "session", error = %e, "token rejected");
                return Err(e.into());
            }
        };

        // A deleted user and a bad token look the same to the caller; only the log differs
        match self.users.get_user(user_id).await {
            Ok(user) => {
                debug!(target: "session", user_id = user.id, "session bound");
                Ok(Identity::new(user.id))
            }
            Err(StoreError::UserNotFound) => {
                warn!(target: "session", user_id, "token names a user that no longer exists");
                Err(AppError::auth("invalid_token", "invalid token"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Middleware: pass public paths through, otherwise bind the caller's `Identity`
/// into request extensions or answer 401.
pub async fn bind_session(State(binder): State<SessionBinder>, mut req: Request, next: Next) -> Response {
    if binder.is_public(req.uri().path()) {
        return next.run(req).await;
    }
    match binder.resolve(req.headers()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_key;
    use crate::storage::MemoryCredentialStore;
    use axum::http::HeaderValue;
    use std::time::Duration;

    async fn binder() -> (SessionBinder, Arc<TokenService>, Arc<MemoryCredentialStore>) {
        let tokens = Arc::new(TokenService::new(&generate_key().unwrap(), Duration::from_secs(60)).unwrap());
        let users = Arc::new(MemoryCredentialStore::new());
        let b = SessionBinder::new(tokens.clone(), users.clone(), ["/api/auth/signin"]);
        (b, tokens, users)
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", token)).unwrap());
        h
    }

    #[tokio::test]
    async fn resolves_existing_user() {
        let (b, tokens, users) = binder().await;
        let u = users.create_user("test", "hash").await.unwrap();
        let id = b.resolve(&bearer(&tokens.issue(u.id).unwrap())).await.unwrap();
        assert_eq!(id, Identity::new(u.id));
        assert!(b.is_public("/api/auth/signin"));
        assert!(!b.is_public("/api/vault"));
    }

    #[tokio::test]
    async fn missing_malformed_and_orphaned_all_401() {
        let (b, tokens, _users) = binder().await;
        let missing = b.resolve(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(missing.http_status(), 401);
        assert_eq!(missing.message(), "authorization header is missing");

        let mut basic = HeaderMap::new();
        basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(b.resolve(&basic).await.unwrap_err().http_status(), 401);

        let bad = b.resolve(&bearer("not-a-token")).await.unwrap_err();
        let orphan = b.resolve(&bearer(&tokens.issue(999).unwrap())).await.unwrap_err();
        assert_eq!(bad.http_status(), 401);
        assert_eq!(orphan.http_status(), 401);
        assert_eq!(bad.message(), orphan.message());
    }
}
