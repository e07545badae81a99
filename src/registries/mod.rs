use std::fmt::{Debug, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

use crate::transport::TransportError;

pub mod dockerhub;
pub mod ghcr;
pub mod resolver;

/// Everything that can go wrong while resolving an image. Every error ends
/// the resolution, there are no partial results.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Could not get a token for `{repository}`: {reason}")]
    Authentication { repository: String, reason: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Unsupported content type `{}` from {url}.", .content_type.as_deref().unwrap_or("<none>"))]
    UnsupportedContentType { url: String, content_type: Option<String> },
    #[error("Unexpected {expected} shape from {url}: {reason}")]
    UnexpectedShape { url: String, expected: &'static str, reason: String },
}

/// Username and password for registries that need basic auth material to hand
/// out tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The value of an `Authorization: Basic …` header.
    pub fn basic_auth_header(&self) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", self.username, self.password)))
    }
}

// Keeps the password out of debug logs.
impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Supplies authentication for one registry vendor.
pub trait TokenProvider {
    /// Returns a bearer token allowing to pull `repository`. An empty token
    /// means the registry is accessed anonymously.
    ///
    /// # Errors
    ///
    /// Returns `Error::Authentication` if no token could be obtained.
    fn get_token(&self, repository: &str) -> Result<String, Error>;

    fn get_credentials(&self) -> Option<&Credentials>;
}

/// For registries that allow anonymous pulls without a token, e.g. MCR.
#[derive(Debug, Default)]
pub struct Anonymous;

impl TokenProvider for Anonymous {
    fn get_token(&self, _repository: &str) -> Result<String, Error> {
        Ok(String::new())
    }

    fn get_credentials(&self) -> Option<&Credentials> {
        None
    }
}

/// Uses a token supplied by the caller as is.
#[derive(Debug)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl TokenProvider for StaticToken {
    fn get_token(&self, _repository: &str) -> Result<String, Error> {
        Ok(self.token.clone())
    }

    fn get_credentials(&self) -> Option<&Credentials> {
        None
    }
}

/// The reply of a docker style token endpoint. Docker Hub sends both fields,
/// some registries only one of them.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token:        Option<String>,
    access_token: Option<String>,
}

/// Requests a pull token from a docker style token endpoint.
fn request_token<T>(transport: &T, url: &str, repository: &str, credentials: Option<&Credentials>) -> Result<String, Error>
where
    T: crate::transport::Transport,
{
    let authentication_error = |reason: String| Error::Authentication {
        repository: repository.to_owned(),
        reason,
    };

    let authorization = credentials.map(Credentials::basic_auth_header);
    let mut headers = vec![("Accept", "application/json")];
    if let Some(authorization) = &authorization {
        headers.push(("Authorization", authorization.as_str()));
    }

    let result = transport.fetch_json(url, &headers).map_err(|e| authentication_error(e.to_string()))?;
    let response: TokenResponse = serde_json::from_value(result.body).map_err(|e| authentication_error(e.to_string()))?;

    response
        .token
        .or(response.access_token)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| authentication_error(format!("{url} returned no token")))
}
