//! Conformance suite run for the local-disk backend.
//!
//! The local backend returns paths verbatim rather than content-addressing
//! them, so the store-path-prefix and directory-manifest requirements do not
//! apply here.

use quilt_local::{LocalConfig, LocalFilesystem};

#[tokio::test]
async fn local_filesystem_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let fs = LocalFilesystem::new(LocalConfig {
        pwd: dir.path().to_string_lossy().into_owned(),
    });

    quilt_spec::assert_put_get_delete(&fs).await;
    quilt_spec::assert_has_reporting(&fs).await;
}
