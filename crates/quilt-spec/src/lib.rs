//! Re-usable behavioral conformance suite for quilt filesystem backends.
//!
//! Every backend's test suite invokes the applicable subset of these
//! assertions, so expected behaviours are checked once, in one place, against
//! every implementation:
//!
//! - [`assert_filesystem`] -- umbrella for content-addressed stores
//! - [`assert_put_get_delete`] -- write, read back, delete a single file
//! - [`assert_store_path_prefix`] -- written paths carry `/<name>/`
//! - [`assert_has_reporting`] -- `has` before and after deletion
//! - [`assert_directories`] -- tree round-trip with post-order path check
//! - [`assert_read_only`] -- writes fail with the read-only error
//!
//! Each assertion panics with a descriptive message on violation, so they
//! compose directly inside `#[tokio::test]` functions.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quilt_fs::{name_prefix, walk, File, Filesystem, FsError, FsResult, WalkVisitor};

fn ctx() -> CancellationToken {
    CancellationToken::new()
}

/// Umbrella requirement set for content-addressed backends.
pub async fn assert_filesystem(fs: &dyn Filesystem) {
    assert_put_get_delete(fs).await;
    assert_store_path_prefix(fs).await;
    assert_has_reporting(fs).await;
}

/// Put, get, then delete a single file; contents must round-trip.
pub async fn assert_put_get_delete(fs: &dyn Filesystem) {
    let path = fs
        .put(&ctx(), File::from_bytes("file.txt", b"foo".to_vec()))
        .await
        .unwrap_or_else(|e| panic!("putting a file shouldn't error. got: {e}"));

    let mut file = fs
        .get(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("getting a just-written file shouldn't error. got: {e}"));
    assert!(
        !file.is_directory(),
        "a written byte file must not read back as a directory"
    );
    let data = file
        .read_to_end()
        .await
        .unwrap_or_else(|e| panic!("reading an opened file shouldn't error. got: {e}"));
    assert_eq!(
        data, b"foo",
        "mismatched contents from get after put"
    );

    fs.delete(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("deleting a written file shouldn't error. got: {e}"));
}

/// Written paths must start with the filesystem's `/<name>/` prefix.
pub async fn assert_store_path_prefix(fs: &dyn Filesystem) {
    let path = fs
        .put(
            &ctx(),
            File::from_bytes("requirement_prefix.txt", b"requirement_prefix".to_vec()),
        )
        .await
        .unwrap_or_else(|e| panic!("putting a file shouldn't error. got: {e}"));

    let prefix = name_prefix(fs.name());
    assert!(
        path.starts_with(&prefix),
        "written path must carry the {prefix:?} prefix. got: {path:?}"
    );

    fs.delete(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("deleting a written file shouldn't error. got: {e}"));
}

/// `has` must report false for unknown paths, true after a write, and false
/// again after deletion -- and never error for absent paths.
pub async fn assert_has_reporting(fs: &dyn Filesystem) {
    let absent = fs
        .has(&ctx(), "no-match")
        .await
        .unwrap_or_else(|e| panic!("has for an absent path shouldn't error. got: {e}"));
    assert!(!absent, "backend claims to have a path that was never written");

    let path = fs
        .put(
            &ctx(),
            File::from_bytes("has_requirement.txt", b"has requirement".to_vec()),
        )
        .await
        .unwrap_or_else(|e| panic!("putting a file shouldn't error. got: {e}"));

    let present = fs
        .has(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("has for a written path shouldn't error. got: {e}"));
    assert!(present, "has must report true for a just-written path");

    fs.delete(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("deleting a written file shouldn't error. got: {e}"));
    let deleted = fs
        .has(&ctx(), &path)
        .await
        .unwrap_or_else(|e| panic!("has after delete shouldn't error. got: {e}"));
    assert!(!deleted, "has must report false after deletion");
}

struct PathCollector(Vec<String>);

#[async_trait]
impl WalkVisitor for PathCollector {
    async fn visit(&mut self, file: File) -> FsResult<()> {
        self.0.push(file.full_path().to_string());
        Ok(())
    }
}

/// Putting a directory hierarchy must round-trip: a post-order walk of the
/// retrieved root reconstructs the input paths, and nested files resolve by
/// name through the returned root path.
pub async fn assert_directories(fs: &dyn Filesystem) {
    let tree = File::dir(
        "/a",
        vec![
            File::from_bytes("b.txt", b"a".to_vec()),
            File::dir("c", vec![File::from_bytes("d.txt", b"d".to_vec())]),
            File::from_bytes("e.txt", b"e".to_vec()),
        ],
    );

    let root = fs
        .put(&ctx(), tree)
        .await
        .unwrap_or_else(|e| panic!("putting a directory shouldn't error. got: {e}"));

    let out = fs
        .get(&ctx(), &root)
        .await
        .unwrap_or_else(|e| panic!("getting a written directory shouldn't error. got: {e}"));
    assert!(out.is_directory(), "directory root must read back as a directory");

    let mut collector = PathCollector(Vec::new());
    walk(out, &mut collector)
        .await
        .unwrap_or_else(|e| panic!("walking the returned root shouldn't error. got: {e}"));
    let expect = ["/a/b.txt", "/a/c/d.txt", "/a/c", "/a/e.txt", "/a"];
    assert_eq!(
        collector.0, expect,
        "post-order walk of the returned root must reconstruct the input paths"
    );

    let mut nested = fs
        .get(&ctx(), &format!("{root}/c/d.txt"))
        .await
        .unwrap_or_else(|e| panic!("opening a nested document shouldn't error. got: {e}"));
    let data = nested.read_to_end().await.unwrap();
    assert_eq!(data, b"d", "nested file contents mismatch");
}

/// Put and delete against a read-only backend must fail with the read-only
/// error.
pub async fn assert_read_only(fs: &dyn Filesystem) {
    let err = fs
        .put(&ctx(), File::from_bytes("x.txt", b"x".to_vec()))
        .await
        .expect_err("put into a read-only filesystem must fail");
    assert!(
        matches!(err, FsError::ReadOnly),
        "put must fail read-only, got: {err}"
    );

    let err = fs
        .delete(&ctx(), "anything")
        .await
        .expect_err("delete against a read-only filesystem must fail");
    assert!(
        matches!(err, FsError::ReadOnly),
        "delete must fail read-only, got: {err}"
    );
}
