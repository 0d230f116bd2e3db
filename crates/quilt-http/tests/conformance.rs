//! Conformance suite run for the read-only HTTP backend.

use quilt_http::HttpFilesystem;

#[tokio::test]
async fn http_filesystem_is_read_only() {
    let fs = HttpFilesystem::default();
    quilt_spec::assert_read_only(&fs).await;
}
