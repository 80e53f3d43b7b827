//! Bearer token negotiation for Docker registry access
//!
//! Registries that answer `/v2/` with a `WWW-Authenticate: Bearer` challenge
//! hand out short-lived tokens scoped to a repository. The client trades its
//! basic credentials for such a token before each operation; registries
//! without a challenge are used with plain basic auth.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{RegistryError, RegistryResult};
use crate::output::OutputManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub service: String,
}

/// Parse a `WWW-Authenticate` header into a bearer challenge.
///
/// Returns `None` for non-Bearer schemes or challenges without a realm.
pub fn parse_challenge(auth_header: &str) -> Option<AuthChallenge> {
    let params_str = auth_header.strip_prefix("Bearer ")?;

    let mut realm = None;
    let mut service = String::new();
    for param in params_str.split(',') {
        let param = param.trim();
        if let Some(eq_pos) = param.find('=') {
            let key = param[..eq_pos].trim();
            let value = param[eq_pos + 1..].trim().trim_matches('"');
            match key {
                "realm" => realm = Some(value.to_string()),
                "service" => service = value.to_string(),
                _ => {}
            }
        }
    }

    realm.map(|realm| AuthChallenge { realm, service })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Request a repository-scoped token from the challenge's realm.
pub async fn request_token(
    client: &Client,
    challenge: &AuthChallenge,
    repository: &str,
    actions: &str,
    credentials: Option<&(String, String)>,
    output: &OutputManager,
) -> RegistryResult<String> {
    let url = format!(
        "{}?service={}&scope=repository:{}:{}",
        challenge.realm, challenge.service, repository, actions
    );

    output.detail(&format!("Requesting token from: {}", url));

    let mut request = client.get(&url);
    if let Some((username, password)) = credentials {
        request = request.basic_auth(username, Some(password));
    }

    let response = request.send().await?;

    if !response.status().is_success() {
        return Err(RegistryError::Auth(format!(
            "token request failed with status {}",
            response.status()
        )));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| RegistryError::Auth(format!("failed to parse token response: {}", e)))?;

    token_response
        .token
        .or(token_response.access_token)
        .ok_or_else(|| RegistryError::Auth("token response contained no token".to_string()))
}
