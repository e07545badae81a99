use tracing::debug;

use crate::registries::{Credentials, Error, TokenProvider, request_token};
use crate::transport::Transport;

const AUTH_URL: &str = "https://auth.docker.io/token";
const SERVICE: &str = "registry.docker.io";

/// Token provider for Docker Hub. Anonymous pulls still need a token, the
/// credentials only raise the rate limit and unlock private repositories.
#[derive(Debug)]
pub struct DockerHub<T> {
    transport:   T,
    credentials: Option<Credentials>,
}

impl<T: Transport> DockerHub<T> {
    pub const fn new(transport: T, credentials: Option<Credentials>) -> Self {
        Self { transport, credentials }
    }

    fn token_url(repository: &str) -> String {
        format!("{AUTH_URL}?service={SERVICE}&scope=repository:{repository}:pull")
    }
}

impl<T: Transport> TokenProvider for DockerHub<T> {
    fn get_token(&self, repository: &str) -> Result<String, Error> {
        debug!("Requesting Docker Hub token for {repository}");
        request_token(&self.transport, &Self::token_url(repository), repository, self.get_credentials())
    }

    fn get_credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}
