//! Registry client implementing the Docker Registry HTTP API v2
//!
//! Covers exactly the operations the migration pipeline needs: liveness
//! probe, blob existence check, streamed blob download and upload, and
//! manifest fetch/publish. Bearer token negotiation is handled per
//! operation; registries without a token challenge fall back to basic auth.

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::{RegistryError, RegistryResult};
use crate::image::digest::short_digest;
use crate::image::ImageManifest;
use crate::output::OutputManager;
use crate::registry::auth::{self, AuthChallenge};
use crate::registry::{ByteStream, RegistryApi};

pub struct RegistryClientBuilder {
    address: String,
    credentials: Option<(String, String)>,
    output: OutputManager,
}

impl RegistryClientBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            credentials: None,
            output: OutputManager::new_quiet(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_output(mut self, output: OutputManager) -> Self {
        self.output = output;
        self
    }

    pub fn build(self) -> RegistryResult<RegistryClient> {
        let parsed =
            Url::parse(&self.address).map_err(|e| RegistryError::Address(e.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RegistryError::Address(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let client = Client::builder().build()?;

        Ok(RegistryClient {
            client,
            address: self.address.trim_end_matches('/').to_string(),
            credentials: self.credentials,
            output: self.output,
            challenge: OnceCell::new(),
        })
    }
}

#[derive(Debug)]
pub struct RegistryClient {
    client: Client,
    address: String,
    credentials: Option<(String, String)>,
    output: OutputManager,
    // Auth challenge discovered on first use; None means no token flow.
    challenge: OnceCell<Option<AuthChallenge>>,
}

impl RegistryClient {
    pub fn builder(address: &str) -> RegistryClientBuilder {
        RegistryClientBuilder::new(address)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Probe `/v2/` once and remember whether the registry hands out tokens.
    async fn challenge(&self) -> RegistryResult<&Option<AuthChallenge>> {
        self.challenge
            .get_or_try_init(|| async {
                let url = format!("{}/v2/", self.address);
                let response = self.client.get(&url).send().await?;

                if response.status() == StatusCode::UNAUTHORIZED {
                    if let Some(header) = response.headers().get(WWW_AUTHENTICATE) {
                        let header = header.to_str().map_err(|e| {
                            RegistryError::Auth(format!("invalid auth challenge header: {}", e))
                        })?;
                        return Ok(auth::parse_challenge(header));
                    }
                }

                Ok(None)
            })
            .await
    }

    /// Obtain a repository-scoped bearer token, if this registry uses them.
    async fn token_for(&self, repository: &str, actions: &str) -> RegistryResult<Option<String>> {
        match self.challenge().await? {
            Some(challenge) => {
                let token = auth::request_token(
                    &self.client,
                    challenge,
                    repository,
                    actions,
                    self.credentials.as_ref(),
                    &self.output,
                )
                .await?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    fn apply_auth(&self, request: RequestBuilder, token: &Option<String>) -> RequestBuilder {
        if let Some(token) = token {
            request.bearer_auth(token)
        } else if let Some((username, password)) = &self.credentials {
            request.basic_auth(username, Some(password))
        } else {
            request
        }
    }

    async fn error_text(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error response".to_string())
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn ping(&self) -> RegistryResult<()> {
        let url = format!("{}/v2/", self.address);
        self.output.detail(&format!("Pinging registry at {}", url));

        let request = self.apply_auth(self.client.get(&url), &None);
        let response = request.send().await?;

        match response.status().as_u16() {
            // 401 still means the registry is alive; it just wants per-repo tokens
            200 | 401 => Ok(()),
            status => Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            }),
        }
    }

    async fn has_layer(&self, repository: &str, digest: &str) -> RegistryResult<bool> {
        let token = self.token_for(repository, "pull").await?;
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);

        self.output.detail(&format!(
            "Checking blob existence in {}: {}",
            repository,
            short_digest(digest)
        ));

        let request = self.apply_auth(self.client.head(&url), &token);
        let response = request.send().await?;

        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(RegistryError::Http {
                status,
                message: format!("blob existence check for {}", digest),
            }),
        }
    }

    async fn download_layer(&self, repository: &str, digest: &str) -> RegistryResult<ByteStream> {
        let token = self.token_for(repository, "pull").await?;
        let url = format!("{}/v2/{}/blobs/{}", self.address, repository, digest);

        self.output
            .detail(&format!("Downloading blob {}", short_digest(digest)));

        let request = self.apply_auth(self.client.get(&url), &token);
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            });
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    async fn upload_layer(
        &self,
        repository: &str,
        digest: &str,
        blob: ByteStream,
        length: u64,
    ) -> RegistryResult<()> {
        let token = self.token_for(repository, "pull,push").await?;

        // Step 1: open an upload session
        let session_url = format!("{}/v2/{}/blobs/uploads/", self.address, repository);
        let request = self.apply_auth(self.client.post(&session_url), &token);
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            });
        }

        let location = response
            .headers()
            .get("Location")
            .ok_or_else(|| RegistryError::Http {
                status: response.status().as_u16(),
                message: "no Location header in upload session response".to_string(),
            })?
            .to_str()
            .map_err(|e| RegistryError::Http {
                status: response.status().as_u16(),
                message: format!("invalid Location header: {}", e),
            })?
            .to_string();

        let location = if location.starts_with('/') {
            format!("{}{}", self.address, location)
        } else {
            location
        };

        // Step 2: monolithic PUT of the blob under its digest
        let upload_url = format!(
            "{}{}digest={}",
            location,
            if location.contains('?') { "&" } else { "?" },
            digest
        );

        self.output.detail(&format!(
            "Uploading blob {} ({})",
            short_digest(digest),
            self.output.format_size(length)
        ));

        let request = self
            .apply_auth(self.client.put(&upload_url), &token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(blob));
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            })
        }
    }

    async fn manifest(&self, repository: &str, tag: &str) -> RegistryResult<ImageManifest> {
        let token = self.token_for(repository, "pull").await?;
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, tag);

        self.output
            .verbose(&format!("Fetching manifest for {}:{}", repository, tag));

        let request = self.apply_auth(self.client.get(&url), &token).header(
            "Accept",
            "application/vnd.docker.distribution.manifest.v1+prettyjws, \
             application/vnd.docker.distribution.manifest.v1+json",
        );
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            });
        }

        let manifest: ImageManifest = response
            .json()
            .await
            .map_err(|e| RegistryError::Manifest(format!("failed to parse manifest: {}", e)))?;
        manifest.validate().map_err(RegistryError::Manifest)?;

        Ok(manifest)
    }

    async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &ImageManifest,
    ) -> RegistryResult<()> {
        let token = self.token_for(repository, "pull,push").await?;
        let url = format!("{}/v2/{}/manifests/{}", self.address, repository, tag);

        self.output
            .verbose(&format!("Publishing manifest for {}:{}", repository, tag));

        let body = serde_json::to_string(manifest)
            .map_err(|e| RegistryError::Manifest(format!("failed to serialize manifest: {}", e)))?;

        let request = self
            .apply_auth(self.client.put(&url), &token)
            .header(CONTENT_TYPE, ImageManifest::media_type())
            .body(body);
        let response = request.send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            Err(RegistryError::Http {
                status,
                message: Self::error_text(response).await,
            })
        }
    }
}
