use tracing::debug;

use crate::registries::{Credentials, Error, TokenProvider, request_token};
use crate::transport::Transport;

const AUTH_URL: &str = "https://ghcr.io/token";

/// Token provider for the GitHub container registry. Public packages hand
/// out anonymous tokens, private ones need a user and a personal access token.
#[derive(Debug)]
pub struct GitHub<T> {
    transport:   T,
    credentials: Option<Credentials>,
}

impl<T: Transport> GitHub<T> {
    pub const fn new(transport: T, credentials: Option<Credentials>) -> Self {
        Self { transport, credentials }
    }
}

impl<T: Transport> TokenProvider for GitHub<T> {
    fn get_token(&self, repository: &str) -> Result<String, Error> {
        debug!("Requesting ghcr.io token for {repository}");
        let url = format!("{AUTH_URL}?scope=repository:{repository}:pull");
        request_token(&self.transport, &url, repository, self.get_credentials())
    }

    fn get_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}
