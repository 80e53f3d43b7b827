//! Migration pipeline tests against an in-memory registry double.
//!
//! The pipeline only sees the `RegistryApi` capability set, so a fake
//! implementation is enough to exercise skip/transfer decisions, failure
//! propagation, and staging-file cleanup without any network access.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;

use docker_image_migrator::OutputManager;
use docker_image_migrator::error::{LayerStage, MigrationError, RegistryError, RegistryResult};
use docker_image_migrator::image::{FsLayer, ImageManifest};
use docker_image_migrator::migrate;
use docker_image_migrator::registry::{
    ByteStream, RegistryApi, RegistryEndpoint, RepositoryReference,
};

// Staging files land in the shared OS temp dir; serialize the tests that
// create them so the cleanup scans do not observe each other's files.
static STAGING_LOCK: Mutex<()> = Mutex::new(());

#[derive(Default)]
struct FakeRegistry {
    blobs: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    manifests: Mutex<HashMap<(String, String), ImageManifest>>,
    checks: AtomicUsize,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    fail_checks: bool,
    fail_uploads: bool,
}

impl FakeRegistry {
    fn with_blob(self, repository: &str, digest: &str, data: &[u8]) -> Self {
        self.blobs
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .insert(digest.to_string(), data.to_vec());
        self
    }

    fn with_manifest(self, repository: &str, tag: &str, manifest: ImageManifest) -> Self {
        self.manifests
            .lock()
            .unwrap()
            .insert((repository.to_string(), tag.to_string()), manifest);
        self
    }

    fn published_manifest(&self, repository: &str, tag: &str) -> Option<ImageManifest> {
        self.manifests
            .lock()
            .unwrap()
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
    }

    fn blob(&self, repository: &str, digest: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(repository)
            .and_then(|blobs| blobs.get(digest))
            .cloned()
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn ping(&self) -> RegistryResult<()> {
        Ok(())
    }

    async fn has_layer(&self, repository: &str, digest: &str) -> RegistryResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.fail_checks {
            return Err(RegistryError::Http {
                status: 500,
                message: "existence check rejected".to_string(),
            });
        }
        Ok(self.blob(repository, digest).is_some())
    }

    async fn download_layer(&self, repository: &str, digest: &str) -> RegistryResult<ByteStream> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let data = self
            .blob(repository, digest)
            .ok_or_else(|| RegistryError::Http {
                status: 404,
                message: format!("blob {} not found", digest),
            })?;

        // split into chunks so the pipeline sees a real multi-chunk stream
        let mid = data.len() / 2;
        let chunks: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&data[..mid])),
            Ok(Bytes::copy_from_slice(&data[mid..])),
        ];
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }

    async fn upload_layer(
        &self,
        repository: &str,
        digest: &str,
        mut blob: ByteStream,
        length: u64,
    ) -> RegistryResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(RegistryError::Http {
                status: 500,
                message: "upload rejected".to_string(),
            });
        }

        let mut data = Vec::new();
        while let Some(chunk) = blob.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        assert_eq!(data.len() as u64, length, "declared blob length mismatch");

        self.blobs
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_default()
            .insert(digest.to_string(), data);
        Ok(())
    }

    async fn manifest(&self, repository: &str, tag: &str) -> RegistryResult<ImageManifest> {
        self.published_manifest(repository, tag)
            .ok_or_else(|| RegistryError::Http {
                status: 404,
                message: format!("manifest {}:{} not found", repository, tag),
            })
    }

    async fn put_manifest(
        &self,
        repository: &str,
        tag: &str,
        manifest: &ImageManifest,
    ) -> RegistryResult<()> {
        self.manifests
            .lock()
            .unwrap()
            .insert((repository.to_string(), tag.to_string()), manifest.clone());
        Ok(())
    }
}

fn digest(fill: char) -> String {
    format!("sha256:{}", fill.to_string().repeat(64))
}

fn manifest_with_layers(repository: &str, tag: &str, digests: &[&str]) -> ImageManifest {
    ImageManifest {
        schema_version: 1,
        name: repository.to_string(),
        tag: tag.to_string(),
        architecture: Some("amd64".to_string()),
        fs_layers: digests
            .iter()
            .map(|d| FsLayer {
                blob_sum: d.to_string(),
            })
            .collect(),
        history: vec![],
    }
}

fn reference(url: &str, repository: &str, tag: &str) -> RepositoryReference {
    RepositoryReference {
        endpoint: RegistryEndpoint::anonymous(url),
        repository: repository.to_string(),
        tag: tag.to_string(),
    }
}

fn staging_files() -> HashSet<PathBuf> {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("docker-image-"))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_all_layers_present_means_zero_transfers() {
    let d1 = digest('a');
    let d2 = digest('b');

    let src = FakeRegistry::default()
        .with_blob("team/app", &d1, b"layer one")
        .with_blob("team/app", &d2, b"layer two")
        .with_manifest(
            "team/app",
            "latest",
            manifest_with_layers("team/app", "latest", &[&d1, &d2]),
        );
    let dest = FakeRegistry::default()
        .with_blob("mirror/app", &d1, b"layer one")
        .with_blob("mirror/app", &d2, b"layer two");

    let output = OutputManager::new_quiet();
    migrate::migrate_image(
        &src,
        &dest,
        &reference("https://src.example.com", "team/app", "latest"),
        &reference("https://dest.example.com", "mirror/app", "latest"),
        &output,
    )
    .await
    .unwrap();

    assert_eq!(dest.checks.load(Ordering::SeqCst), 2);
    assert_eq!(src.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(dest.uploads.load(Ordering::SeqCst), 0);
    assert!(dest.published_manifest("mirror/app", "latest").is_some());
}

#[tokio::test]
async fn test_migrates_only_missing_layers() {
    let _guard = STAGING_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let d1 = digest('a');
    let d2 = digest('b');

    let src = FakeRegistry::default()
        .with_blob("team/app", &d1, b"layer one")
        .with_blob("team/app", &d2, b"layer two")
        .with_manifest(
            "team/app",
            "v3",
            manifest_with_layers("team/app", "v3", &[&d1, &d2]),
        );
    // destination already holds d1
    let dest = FakeRegistry::default().with_blob("mirror/app", &d1, b"layer one");

    let output = OutputManager::new_quiet();
    migrate::migrate_image(
        &src,
        &dest,
        &reference("https://src.example.com", "team/app", "v3"),
        &reference("https://dest.example.com", "mirror/app", "v3"),
        &output,
    )
    .await
    .unwrap();

    // exactly one transfer happened, for the missing layer
    assert_eq!(src.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(dest.uploads.load(Ordering::SeqCst), 1);
    assert_eq!(dest.blob("mirror/app", &d2).unwrap(), b"layer two");

    // the published manifest preserves layer order and only the name differs
    let published = dest.published_manifest("mirror/app", "v3").unwrap();
    assert_eq!(published.name, "mirror/app");
    assert_eq!(
        published
            .fs_layers
            .iter()
            .map(|l| l.blob_sum.as_str())
            .collect::<Vec<_>>(),
        vec![d1.as_str(), d2.as_str()]
    );

    // the source manifest was never mutated
    let source_manifest = src.published_manifest("team/app", "v3").unwrap();
    assert_eq!(source_manifest.name, "team/app");
}

#[tokio::test]
async fn test_first_layer_failure_aborts_the_migration() {
    let _guard = STAGING_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let d1 = digest('a');
    let d2 = digest('b');

    let src = FakeRegistry::default()
        .with_blob("team/app", &d1, b"layer one")
        .with_blob("team/app", &d2, b"layer two")
        .with_manifest(
            "team/app",
            "latest",
            manifest_with_layers("team/app", "latest", &[&d1, &d2]),
        );
    let dest = FakeRegistry {
        fail_uploads: true,
        ..FakeRegistry::default()
    };

    let output = OutputManager::new_quiet();
    let err = migrate::migrate_image(
        &src,
        &dest,
        &reference("https://src.example.com", "team/app", "latest"),
        &reference("https://dest.example.com", "mirror/app", "latest"),
        &output,
    )
    .await
    .unwrap_err();

    match err {
        MigrationError::Layer { stage, digest, .. } => {
            assert_eq!(stage, LayerStage::Upload);
            assert_eq!(digest, d1);
        }
        other => panic!("expected a layer error, got: {}", other),
    }

    // the second layer was never attempted and no manifest was published
    assert_eq!(dest.checks.load(Ordering::SeqCst), 1);
    assert!(dest.published_manifest("mirror/app", "latest").is_none());
}

#[tokio::test]
async fn test_existence_check_failure_aborts_before_any_transfer() {
    let d1 = digest('a');

    let src = FakeRegistry::default()
        .with_blob("team/app", &d1, b"layer one")
        .with_manifest(
            "team/app",
            "latest",
            manifest_with_layers("team/app", "latest", &[&d1]),
        );
    let dest = FakeRegistry {
        fail_checks: true,
        ..FakeRegistry::default()
    };

    let output = OutputManager::new_quiet();
    let err = migrate::migrate_image(
        &src,
        &dest,
        &reference("https://src.example.com", "team/app", "latest"),
        &reference("https://dest.example.com", "mirror/app", "latest"),
        &output,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        MigrationError::Layer {
            stage: LayerStage::Check,
            ..
        }
    ));
    assert_eq!(src.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(dest.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_source_manifest_is_a_fetch_error() {
    let src = FakeRegistry::default();
    let dest = FakeRegistry::default();

    let output = OutputManager::new_quiet();
    let err = migrate::migrate_image(
        &src,
        &dest,
        &reference("https://src.example.com", "team/app", "latest"),
        &reference("https://dest.example.com", "mirror/app", "latest"),
        &output,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, MigrationError::ManifestFetch { .. }));
    assert_eq!(dest.checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_staging_file_is_removed_after_successful_transfer() {
    let _guard = STAGING_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let d1 = digest('c');
    let src = FakeRegistry::default().with_blob("team/app", &d1, b"layer bytes");
    let dest = FakeRegistry::default();

    let before = staging_files();
    let output = OutputManager::new_quiet();
    migrate::migrate_layer(&src, &dest, "team/app", "mirror/app", &d1, &output)
        .await
        .unwrap();

    let leaked: Vec<_> = staging_files().difference(&before).cloned().collect();
    assert!(leaked.is_empty(), "leaked staging files: {:?}", leaked);
}

#[tokio::test]
async fn test_staging_file_is_removed_after_failed_upload() {
    let _guard = STAGING_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let d1 = digest('d');
    let src = FakeRegistry::default().with_blob("team/app", &d1, b"layer bytes");
    let dest = FakeRegistry {
        fail_uploads: true,
        ..FakeRegistry::default()
    };

    let before = staging_files();
    let output = OutputManager::new_quiet();
    let err = migrate::migrate_layer(&src, &dest, "team/app", "mirror/app", &d1, &output)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Layer {
            stage: LayerStage::Upload,
            ..
        }
    ));

    let leaked: Vec<_> = staging_files().difference(&before).cloned().collect();
    assert!(leaked.is_empty(), "leaked staging files: {:?}", leaked);
}
