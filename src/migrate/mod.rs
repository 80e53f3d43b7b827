//! Image migration pipeline
//!
//! Copies one image from a source registry to a destination registry:
//! fetch the source manifest, move every layer in manifest order, then
//! publish a manifest copy re-addressed to the destination repository.
//! Layers are migrated strictly sequentially, each one staged through a
//! temporary local file that is fully written and synced before the upload
//! re-reads it. All stages are fail-fast; a single failed layer aborts the
//! whole migration.

use std::path::Path;

use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{LayerStage, MigrationError, Result};
use crate::image::digest::short_digest;
use crate::output::OutputManager;
use crate::registry::{RegistryApi, RepositoryReference};

/// Prefix for layer staging files, matching what shows up in the OS temp dir.
const STAGING_FILE_PREFIX: &str = "docker-image-";

fn layer_error(stage: LayerStage, digest: &str, message: impl ToString) -> MigrationError {
    MigrationError::Layer {
        stage,
        digest: digest.to_string(),
        message: message.to_string(),
    }
}

/// Migrate a single layer, skipping the transfer when the destination
/// already holds the digest.
///
/// Layers are content-addressed, so a digest present in two registries is
/// guaranteed byte-identical; re-running against a partially migrated
/// destination skips already-present layers.
pub async fn migrate_layer(
    src: &impl RegistryApi,
    dest: &impl RegistryApi,
    src_repo: &str,
    dest_repo: &str,
    digest: &str,
    output: &OutputManager,
) -> Result<()> {
    output.step(&format!(
        "Checking if layer {} exists in the destination",
        short_digest(digest)
    ));

    let exists = dest
        .has_layer(dest_repo, digest)
        .await
        .map_err(|e| layer_error(LayerStage::Check, digest, e))?;

    if exists {
        output.info(&format!(
            "Layer {} already exists in the destination",
            short_digest(digest)
        ));
        return Ok(());
    }

    output.info(&format!(
        "Uploading layer {} to the destination",
        short_digest(digest)
    ));

    let staging = tempfile::Builder::new()
        .prefix(STAGING_FILE_PREFIX)
        .tempfile()
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?;

    let result =
        copy_layer_via_file(src, dest, src_repo, dest_repo, digest, staging.path(), output).await;

    // A leaked staging file must not fail the migration
    if let Err(err) = staging.close() {
        output.warning(&format!("Failed to remove layer staging file: {}", err));
    }

    result
}

/// Download the blob into `path`, sync it, then upload it from a fresh read
/// handle. The write handle and the read handle are never the same; the file
/// is fully written and synced before being re-read.
async fn copy_layer_via_file(
    src: &impl RegistryApi,
    dest: &impl RegistryApi,
    src_repo: &str,
    dest_repo: &str,
    digest: &str,
    path: &Path,
    output: &OutputManager,
) -> Result<()> {
    let mut blob = src
        .download_layer(src_repo, digest)
        .await
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?;

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?;

    while let Some(chunk) = blob
        .try_next()
        .await
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| layer_error(LayerStage::Download, digest, e))?;
    }

    file.flush()
        .await
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?;
    file.sync_all()
        .await
        .map_err(|e| layer_error(LayerStage::Download, digest, e))?;
    drop(file);

    let staged = tokio::fs::File::open(path)
        .await
        .map_err(|e| layer_error(LayerStage::Upload, digest, e))?;
    let length = staged
        .metadata()
        .await
        .map_err(|e| layer_error(LayerStage::Upload, digest, e))?
        .len();

    output.detail(&format!(
        "Layer {} staged locally ({})",
        short_digest(digest),
        output.format_size(length)
    ));

    dest.upload_layer(dest_repo, digest, Box::pin(ReaderStream::new(staged)), length)
        .await
        .map_err(|e| layer_error(LayerStage::Upload, digest, e))?;

    Ok(())
}

/// Migrate a whole image between two already-connected registries.
pub async fn migrate_image(
    src: &impl RegistryApi,
    dest: &impl RegistryApi,
    src_ref: &RepositoryReference,
    dest_ref: &RepositoryReference,
    output: &OutputManager,
) -> Result<()> {
    let manifest = src
        .manifest(&src_ref.repository, &src_ref.tag)
        .await
        .map_err(|e| MigrationError::ManifestFetch {
            url: src_ref.endpoint.url.clone(),
            repository: src_ref.repository.clone(),
            tag: src_ref.tag.clone(),
            message: e.to_string(),
        })?;

    output.info(&format!(
        "Manifest for {}:{} lists {} layers",
        src_ref.repository,
        src_ref.tag,
        manifest.fs_layers.len()
    ));

    // Manifest order encodes the filesystem stacking order; preserve it
    for layer in &manifest.fs_layers {
        migrate_layer(
            src,
            dest,
            &src_ref.repository,
            &dest_ref.repository,
            &layer.blob_sum,
            output,
        )
        .await?;
    }

    let dest_manifest = manifest.for_repository(&dest_ref.repository);
    dest.put_manifest(&dest_ref.repository, &dest_ref.tag, &dest_manifest)
        .await
        .map_err(|e| MigrationError::ManifestPublish {
            url: dest_ref.endpoint.url.clone(),
            repository: dest_ref.repository.clone(),
            tag: dest_ref.tag.clone(),
            message: e.to_string(),
        })?;

    output.success(&format!(
        "Manifest published to {}:{}",
        dest_ref.repository, dest_ref.tag
    ));

    Ok(())
}
