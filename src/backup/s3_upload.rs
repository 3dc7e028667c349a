// tablebackup/src/backup/s3_upload.rs
use std::path::PathBuf;
use tracing::{error, info};

use crate::storage::BlobStore;

/// `{key_prefix}/{base_name}`, or just the base name for an empty prefix.
pub fn object_key(key_prefix: &str, base_name: &str) -> String {
    let prefix = key_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        base_name.to_string()
    } else {
        format!("{}/{}", prefix, base_name)
    }
}

/// Uploads `dump_files` in order, one at a time. Stops at the first failed
/// transfer and returns `false`; `true` means every file made it.
pub async fn upload_dumps(
    store: &dyn BlobStore,
    dump_files: &[PathBuf],
    bucket: &str,
    key_prefix: &str,
) -> bool {
    info!(count = dump_files.len(), bucket, key_prefix, "Uploading dump files");

    for dump_file in dump_files {
        let Some(base_name) = dump_file.file_name().map(|n| n.to_string_lossy().trim().to_string())
        else {
            error!(file = %dump_file.display(), "Dump path has no file name");
            return false;
        };
        let key = object_key(key_prefix, &base_name);
        info!(file = %dump_file.display(), bucket, key = %key, "Uploading dump");

        if let Err(e) = store.put_object(bucket, &key, dump_file).await {
            error!(file = %dump_file.display(), error = %e, "Upload failed; skipping remaining files");
            return false;
        }
    }

    info!(count = dump_files.len(), bucket, "All dump files uploaded");
    true
}
