//! Error handling module for the Docker image migrator
//!
//! Two layers of errors: `RegistryError` covers the registry HTTP client,
//! `MigrationError` covers the migration pipeline stages. Every pipeline
//! stage is fail-fast and non-retrying; the first error aborts the run.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrationError>;
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Errors produced by the registry HTTP client.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid manifest: {0}")]
    Manifest(String),
    #[error("invalid registry URL: {0}")]
    Address(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which registry a connection error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTarget {
    Source,
    Destination,
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Source => write!(f, "source"),
            ConnectionTarget::Destination => write!(f, "destination"),
        }
    }
}

/// Whether a connection failed while building the client or while probing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    BuildClient,
    Ping,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::BuildClient => write!(f, "Failed to create a client for"),
            ConnectionErrorKind::Ping => write!(f, "Failed to ping"),
        }
    }
}

/// The per-layer operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerStage {
    Check,
    Download,
    Upload,
}

impl fmt::Display for LayerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerStage::Check => write!(f, "existence check"),
            LayerStage::Download => write!(f, "download"),
            LayerStage::Upload => write!(f, "upload"),
        }
    }
}

/// Errors produced by the migration pipeline, one variant per stage.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Missing or inconsistent arguments, caught before any network I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential exchange with the cloud provider failed.
    #[error("Failed to resolve registry credentials: {0}")]
    AuthResolution(String),

    /// Client construction or liveness probe failed for one of the registries.
    #[error("{kind} {target} registry {url}: {message}")]
    Connection {
        target: ConnectionTarget,
        kind: ConnectionErrorKind,
        url: String,
        message: String,
    },

    #[error("Failed to fetch the manifest for {url}/{repository}:{tag}: {message}")]
    ManifestFetch {
        url: String,
        repository: String,
        tag: String,
        message: String,
    },

    /// A single layer failed to migrate; the digest identifies the blob.
    #[error("Layer {digest}: {stage} failed: {message}")]
    Layer {
        stage: LayerStage,
        digest: String,
        message: String,
    },

    #[error("Failed to upload the manifest to {url}/{repository}:{tag}: {message}")]
    ManifestPublish {
        url: String,
        repository: String,
        tag: String,
        message: String,
    },
}
