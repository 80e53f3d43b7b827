//! Amazon ECR credential resolution
//!
//! ECR registries do not accept static passwords. The account identifier and
//! region embedded in the registry hostname are exchanged, through the AWS
//! SDK, for a short-lived authorization token and the canonical proxy
//! endpoint to use in place of the original URL. Tokens are short-lived by
//! design, so resolver failures surface immediately instead of retrying.

use aws_config::{BehaviorVersion, Region};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MigrationError, Result};
use crate::output::OutputManager;
use crate::registry::RegistryEndpoint;

static ECR_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<account_id>[0-9]{12})\.dkr\.ecr\.(?P<region>[\w-]+)\.amazonaws\.com").unwrap()
});

/// The account and region encoded in an ECR registry hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrRegistry {
    pub account_id: String,
    pub region: String,
}

impl EcrRegistry {
    /// Parse the account/region hostname convention out of a registry URL.
    pub fn from_url(url: &str) -> Option<Self> {
        ECR_HOST.captures(url).map(|caps| Self {
            account_id: caps["account_id"].to_string(),
            region: caps["region"].to_string(),
        })
    }
}

/// Resolve a raw registry URL into an endpoint with usable credentials.
///
/// URLs that do not match the ECR hostname convention pass through unchanged
/// with empty credentials; static credentials, if any, are supplied by other
/// means.
pub async fn resolve_credentials(url: &str, output: &OutputManager) -> Result<RegistryEndpoint> {
    let Some(ecr) = EcrRegistry::from_url(url) else {
        return Ok(RegistryEndpoint::anonymous(url));
    };

    output.verbose(&format!(
        "Registry {} is ECR account {} in {}, requesting an authorization token",
        url, ecr.account_id, ecr.region
    ));

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(ecr.region.clone()))
        .load()
        .await;
    let client = aws_sdk_ecr::Client::new(&config);

    let response = client
        .get_authorization_token()
        .registry_ids(&ecr.account_id)
        .send()
        .await
        .map_err(|e| {
            MigrationError::AuthResolution(format!(
                "failed to get ECR authorization token for registry {}: {}",
                ecr.account_id, e
            ))
        })?;

    let authorization = response
        .authorization_data()
        .first()
        .ok_or_else(|| {
            MigrationError::AuthResolution(format!(
                "ECR returned no authorization data for registry {}",
                ecr.account_id
            ))
        })?;

    let token = authorization.authorization_token().ok_or_else(|| {
        MigrationError::AuthResolution("ECR authorization data contained no token".to_string())
    })?;
    let proxy_endpoint = authorization.proxy_endpoint().ok_or_else(|| {
        MigrationError::AuthResolution("ECR authorization data contained no proxy endpoint".to_string())
    })?;

    let decoded = BASE64.decode(token).map_err(|e| {
        MigrationError::AuthResolution(format!("failed to decode ECR authorization token: {}", e))
    })?;
    let decoded = String::from_utf8(decoded).map_err(|e| {
        MigrationError::AuthResolution(format!("ECR authorization token is not UTF-8: {}", e))
    })?;

    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        MigrationError::AuthResolution(
            "malformed ECR authorization token payload: missing ':' separator".to_string(),
        )
    })?;

    output.detail(&format!("Using ECR proxy endpoint {}", proxy_endpoint));
    Ok(RegistryEndpoint::with_credentials(
        proxy_endpoint,
        username,
        password,
    ))
}
