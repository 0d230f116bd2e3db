//! Conformance suite run for the on-disk network backend.

use tokio_util::sync::CancellationToken;

use quilt_ipfs::{init_repo, IpfsConfig, IpfsFilesystem};

#[tokio::test]
async fn ipfs_filesystem_conformance() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path()).unwrap();

    let scope = CancellationToken::new();
    let fs = IpfsFilesystem::open(
        &scope,
        IpfsConfig {
            path: dir.path().to_string_lossy().into_owned(),
            ..Default::default()
        },
    )
    .unwrap();

    quilt_spec::assert_filesystem(&fs).await;
    quilt_spec::assert_directories(&fs).await;
}
