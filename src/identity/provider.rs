use std::sync::Arc;

use tracing::{debug, info};

use super::TokenService;
use crate::error::{AppError, AppResult};
use crate::security::Hasher;
use crate::storage::{CredentialStore, StoreError, User, MAX_LOGIN_LEN};
use crate::tprintln;

/// Sign-up and sign-in over a credential store.
pub struct AuthProvider {
    users: Arc<dyn CredentialStore>,
    hasher: Hasher,
    tokens: Arc<TokenService>,
}

/// Login and password share the same bound, counted in characters.
pub fn validate_credential(field: &str, value: &str) -> AppResult<()> {
    let n = value.chars().count();
    if n == 0 || n > MAX_LOGIN_LEN {
        return Err(AppError::user(
            format!("invalid_{}", field),
            format!("{} is empty or too long more than {} characters but actual len is {}", field, MAX_LOGIN_LEN, n),
        ));
    }
    Ok(())
}

fn bad_credentials() -> AppError {
    AppError::user("invalid_credentials", "invalid login or password")
}

impl AuthProvider {
    pub fn new(users: Arc<dyn CredentialStore>, hasher: Hasher, tokens: Arc<TokenService>) -> Self {
        Self { users, hasher, tokens }
    }

    pub async fn sign_up(&self, login: &str, password: &str) -> AppResult<User> {
        validate_credential("login", login)?;
        validate_credential("password", password)?;

        match self.users.get_user_by_login(login).await {
            Ok(_) => return Err(StoreError::DuplicateLogin.into()),
            Err(StoreError::UserNotFound) => {}
            Err(e) => return Err(e.into()),
        }

        // Argon2 is CPU-bound; keep it off the async workers
        let hasher = self.hasher.clone();
        let plain = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&plain)).await??;

        // A concurrent sign-up can still lose on the UNIQUE constraint
        let user = self.users.create_user(login, &hash).await?;
        info!(target: "auth", user_id = user.id, login = %user.login, "user signed up");
        Ok(user)
    }

    /// Bearer token for valid credentials. Unknown login and wrong password are indistinguishable.
    pub async fn sign_in(&self, login: &str, password: &str) -> AppResult<String> {
        let user = match self.users.get_user_by_login(login).await {
            Ok(u) => u,
            Err(StoreError::UserNotFound) => {
                debug!(target: "auth", login, "sign-in for unknown login");
                return Err(bad_credentials());
            }
            Err(e) => return Err(e.into()),
        };

        let hasher = self.hasher.clone();
        let stored = user.password_hash.clone();
        let plain = password.to_string();
        let ok = tokio::task::spawn_blocking(move || hasher.matches(&stored, &plain)).await?;
        if !ok {
            debug!(target: "auth", user_id = user.id, "sign-in with wrong password");
            return Err(bad_credentials());
        }

        let token = self.tokens.issue(user.id)?;
        tprintln!("auth.signin user_id={} login={}", user.id, user.login);
        info!(target: "auth", user_id = user.id, "user signed in");
        Ok(token)
    }
}
