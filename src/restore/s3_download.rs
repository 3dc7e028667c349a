// tablebackup/src/restore/s3_download.rs
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info};

use crate::storage::BlobStore;

/// Mirrors an object key as a relative path under `local_root`. Keys that are
/// absolute or climb out of the root are refused.
pub fn local_path_for_key(local_root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    if key.is_empty() {
        return None;
    }
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    safe.then(|| local_root.join(relative))
}

/// Downloads every object under `key_prefix` into `local_root`, recreating the
/// key structure. Any listing or transfer error aborts and returns `false`.
pub async fn download_prefix(
    store: &dyn BlobStore,
    bucket: &str,
    key_prefix: &str,
    local_root: &Path,
) -> bool {
    info!(bucket, key_prefix, root = %local_root.display(), "Downloading sql backup files");

    let keys = match store.list_objects(bucket, key_prefix).await {
        Ok(keys) => keys,
        Err(e) => {
            error!(bucket, key_prefix, error = %e, "Listing objects failed");
            return false;
        }
    };

    let mut downloaded = 0usize;
    for key in keys.iter().filter(|k| !k.ends_with('/')) {
        let Some(destination_path) = local_path_for_key(local_root, key) else {
            error!(bucket, key = %key, "Refusing to download key outside the restore root");
            return false;
        };

        if let Some(parent_dir) = destination_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent_dir).await {
                error!(dir = %parent_dir.display(), error = %e, "Failed to create directory for download");
                return false;
            }
        }

        if let Err(e) = store.get_object(bucket, key, &destination_path).await {
            error!(bucket, key = %key, error = %e, "Download failed");
            return false;
        }
        debug!(key = %key, path = %destination_path.display(), "Downloaded object");
        downloaded += 1;
    }

    info!(bucket, key_prefix, downloaded, "Download finished");
    true
}
