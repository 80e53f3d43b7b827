//! Registry module for Docker registry interactions
//!
//! Exposes the capability set the migration pipeline consumes (`RegistryApi`),
//! the reqwest-backed client implementing it against the Docker Registry
//! HTTP API v2, and credential resolution for Amazon ECR endpoints.

pub mod auth;
pub mod client;
pub mod ecr;

pub use client::{RegistryClient, RegistryClientBuilder};
pub use ecr::{EcrRegistry, resolve_credentials};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::{
    ConnectionErrorKind, ConnectionTarget, MigrationError, RegistryResult, Result,
};
use crate::image::ImageManifest;
use crate::output::OutputManager;

/// Byte stream used for layer blobs in transit.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A resolved registry endpoint with credentials.
///
/// Username and password are both empty for anonymous registries, or both
/// set; never one without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoint {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl RegistryEndpoint {
    pub fn anonymous(url: &str) -> Self {
        Self {
            url: url.to_string(),
            username: String::new(),
            password: String::new(),
        }
    }

    pub fn with_credentials(url: &str, username: &str, password: &str) -> Self {
        Self {
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// One side of a migration: a resolved endpoint plus repository name and tag.
#[derive(Debug, Clone)]
pub struct RepositoryReference {
    pub endpoint: RegistryEndpoint,
    pub repository: String,
    pub tag: String,
}

/// Capability set of a registry, as consumed by the migration pipeline.
///
/// Any concrete client implementing these six operations is interchangeable,
/// which is what allows the pipeline to run against test doubles without
/// network access.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Liveness probe against the registry API root.
    async fn ping(&self) -> RegistryResult<()>;

    /// Check whether a blob with the given digest exists in the repository.
    async fn has_layer(&self, repository: &str, digest: &str) -> RegistryResult<bool>;

    /// Stream a layer blob out of the registry.
    async fn download_layer(&self, repository: &str, digest: &str) -> RegistryResult<ByteStream>;

    /// Stream a layer blob into the registry under the given digest.
    async fn upload_layer(
        &self,
        repository: &str,
        digest: &str,
        blob: ByteStream,
        length: u64,
    ) -> RegistryResult<()>;

    /// Fetch the manifest for a repository and tag.
    async fn manifest(&self, repository: &str, tag: &str) -> RegistryResult<ImageManifest>;

    /// Publish a manifest under a repository and tag.
    async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &ImageManifest,
    ) -> RegistryResult<()>;
}

/// Build a client for the endpoint and verify it is reachable.
///
/// Client construction and the liveness probe fail with distinguished error
/// subkinds so callers can report "could not build client" vs "could not
/// reach server". No retries; an unreachable endpoint aborts the migration.
pub async fn connect(
    endpoint: &RegistryEndpoint,
    target: ConnectionTarget,
    output: &OutputManager,
) -> Result<RegistryClient> {
    let mut builder = RegistryClient::builder(&endpoint.url).with_output(output.clone());
    if !endpoint.is_anonymous() {
        builder = builder.with_credentials(&endpoint.username, &endpoint.password);
    }

    let client = builder.build().map_err(|e| MigrationError::Connection {
        target,
        kind: ConnectionErrorKind::BuildClient,
        url: endpoint.url.clone(),
        message: e.to_string(),
    })?;

    client.ping().await.map_err(|e| MigrationError::Connection {
        target,
        kind: ConnectionErrorKind::Ping,
        url: endpoint.url.clone(),
        message: e.to_string(),
    })?;

    output.verbose(&format!("Connected to {} registry {}", target, endpoint.url));
    Ok(client)
}
