//! Typed HTTP client for the vault API.

use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use thiserror::Error;

use crate::api::{
    encode_value, Credentials, SignUpResponse, VaultRequest, VaultResponse, VaultSummary,
    AUTH_SIGNIN_URI, AUTH_SIGNUP_URI, PING_URI, UPLOAD_URI, VAULT_URI,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Clone)]
pub struct KeeperClient {
    base: Url,
    client: reqwest::Client,
    token: Option<String>,
}

impl KeeperClient {
    pub fn new(base: &str) -> ClientResult<Self> {
        let base = Url::parse(base).map_err(|e| ClientError::Url(e.to_string()))?;
        Ok(Self { base, client: reqwest::Client::new(), token: None })
    }

    /// Reuse a token from an earlier sign-in.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> { self.token.as_deref() }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base.join(path).map_err(|e| ClientError::Url(e.to_string()))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => req.header(AUTHORIZATION, format!("Bearer {}", t)),
            None => req,
        }
    }

    async fn check(resp: Response) -> ClientResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::Status { status: status.as_u16(), body: body.trim().to_string() })
    }

    pub async fn sign_up(&self, login: &str, password: &str) -> ClientResult<SignUpResponse> {
        let body = Credentials { login: login.into(), password: password.into() };
        let resp = self.client.post(self.url(AUTH_SIGNUP_URI)?).json(&body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Sign in and keep the returned token for later calls.
    pub async fn sign_in(&mut self, login: &str, password: &str) -> ClientResult<String> {
        let body = Credentials { login: login.into(), password: password.into() };
        let resp = self.client.post(self.url(AUTH_SIGNIN_URI)?).json(&body).send().await?;
        let resp = Self::check(resp).await?;
        let token = resp
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or_else(|| ClientError::Decode("sign-in response has no bearer token".into()))?;
        self.token = Some(token.clone());
        Ok(token)
    }

    pub async fn get_vault(&self, id: u64) -> ClientResult<VaultResponse> {
        let url = self.url(&format!("{}/{}", VAULT_URI, id))?;
        let resp = self.authed(self.client.get(url)).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Create (`id` = None) or update an entry. Non-UTF-8 values are sent base64-encoded.
    pub async fn put_vault(&self, id: Option<u64>, key: &str, value: &[u8]) -> ClientResult<VaultResponse> {
        let (value, encoding) = encode_value(value);
        let body = VaultRequest { id, key: key.to_string(), value, encoding };
        let resp = self.authed(self.client.post(self.url(VAULT_URI)?)).json(&body).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    /// Upload a file as a new entry, or into `id` when given.
    pub async fn upload_file(&self, id: Option<u64>, file_name: &str, data: Vec<u8>) -> ClientResult<VaultSummary> {
        let path = match id {
            Some(id) => format!("{}/{}", UPLOAD_URI, id),
            None => UPLOAD_URI.to_string(),
        };
        let part = Part::bytes(data).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        let resp = self.authed(self.client.post(self.url(&path)?)).multipart(form).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn ping(&self) -> ClientResult<()> {
        let resp = self.client.get(self.url(PING_URI)?).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}

/// Bytes of a fetched entry's value.
pub fn value_bytes(resp: &VaultResponse) -> ClientResult<Vec<u8>> {
    resp.value_bytes().map_err(|e| ClientError::Decode(e.to_string()))
}
