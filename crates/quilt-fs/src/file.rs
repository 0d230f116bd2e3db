use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FsError, FsResult};
use crate::hook::HookFile;
use crate::paths;

/// Media type reported by every directory.
pub const DIRECTORY_MEDIA_TYPE: &str = "application/x-directory";

/// The byte source backing a [`BytesFile`].
pub enum FileContent {
    /// A full in-memory buffer. Size is known exactly.
    Bytes(std::io::Cursor<Vec<u8>>),
    /// An arbitrary byte stream. Size is unknown.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// The file has been closed; reads return EOF.
    Closed,
}

/// A plain byte file: a full path plus a readable byte source.
pub struct BytesFile {
    path: String,
    size: Option<u64>,
    media_type: Option<String>,
    mod_time: Option<DateTime<Utc>>,
    content: FileContent,
}

impl BytesFile {
    /// A file over an in-memory buffer. Reports an exact size.
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            path: path.into(),
            size: Some(size),
            media_type: None,
            mod_time: Some(Utc::now()),
            content: FileContent::Bytes(std::io::Cursor::new(data)),
        }
    }

    /// A file over an arbitrary stream. Size is unknown.
    pub fn from_reader(
        path: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> Self {
        Self {
            path: path.into(),
            size: None,
            media_type: None,
            mod_time: None,
            content: FileContent::Stream(reader),
        }
    }

    /// Override the reported media type (e.g. from an HTTP header).
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Override the reported size (e.g. from file metadata).
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Override the modification time.
    pub fn with_mod_time(mut self, mod_time: DateTime<Utc>) -> Self {
        self.mod_time = Some(mod_time);
        self
    }

    pub fn full_path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        paths::base_name(&self.path)
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.mod_time
    }

    /// The media type, from the override if set, otherwise guessed from the
    /// file extension.
    pub fn media_type(&self) -> String {
        if let Some(mt) = &self.media_type {
            return mt.clone();
        }
        mime_guess::from_path(&self.path)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_default()
    }

    pub(crate) fn set_full_path(&mut self, path: String) {
        self.path = path;
    }

    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match &mut self.content {
            FileContent::Bytes(cursor) => Ok(std::io::Read::read(cursor, buf)?),
            FileContent::Stream(reader) => Ok(reader.read(buf).await?),
            FileContent::Closed => Ok(0),
        }
    }

    /// Consume the remaining content into a buffer.
    pub async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        let mut out = Vec::new();
        match &mut self.content {
            FileContent::Bytes(cursor) => {
                std::io::Read::read_to_end(cursor, &mut out)?;
            }
            FileContent::Stream(reader) => {
                reader.read_to_end(&mut out).await?;
            }
            FileContent::Closed => {}
        }
        Ok(out)
    }

    /// Release the underlying byte source. Closing twice is a no-op.
    pub fn close(&mut self) -> FsResult<()> {
        self.content = FileContent::Closed;
        Ok(())
    }
}

impl fmt::Debug for BytesFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish()
    }
}

/// A directory: a full path plus an ordered sequence of children.
///
/// Children are consumed serially through [`Directory::next_child`]; once the
/// sequence is exhausted the directory is an empty shell that still reports
/// its path.
pub struct Directory {
    path: String,
    mod_time: Option<DateTime<Utc>>,
    children: VecDeque<File>,
}

impl Directory {
    /// Create a directory, attaching children.
    ///
    /// Attaching re-roots every child: after construction each child's full
    /// path equals `join(full_path(parent), base(child))`, recursively.
    pub fn new(path: impl Into<String>, children: Vec<File>) -> Self {
        let path = path.into();
        let mut dir = Self {
            path,
            mod_time: Some(Utc::now()),
            children: children.into(),
        };
        dir.reroot_children();
        dir
    }

    fn reroot_children(&mut self) {
        let parent = self.path.clone();
        for child in self.children.iter_mut() {
            let base = child.file_name().to_string();
            child.set_full_path(paths::join(&parent, &base));
        }
    }

    pub fn full_path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        paths::base_name(&self.path)
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        self.mod_time
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// The next child, or `None` once the sequence is exhausted.
    pub fn next_child(&mut self) -> Option<File> {
        self.children.pop_front()
    }

    pub(crate) fn set_full_path(&mut self, path: String) {
        self.path = path;
        self.reroot_children();
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("path", &self.path)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A file handed to or returned from a filesystem.
///
/// One tagged type covers the three shapes the system deals in: plain byte
/// files, directories, and hook-wrapped byte files whose final content is
/// produced by a callback during merkelization.
#[derive(Debug)]
pub enum File {
    Bytes(BytesFile),
    Dir(Directory),
    Hooked(HookFile),
}

impl File {
    /// A byte file over an in-memory buffer.
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>) -> File {
        File::Bytes(BytesFile::from_bytes(path, data))
    }

    /// A byte file over an arbitrary stream; size reported as unknown.
    pub fn from_reader(
        path: impl Into<String>,
        reader: Box<dyn AsyncRead + Send + Unpin>,
    ) -> File {
        File::Bytes(BytesFile::from_reader(path, reader))
    }

    /// A directory with the given children attached.
    pub fn dir(path: impl Into<String>, children: Vec<File>) -> File {
        File::Dir(Directory::new(path, children))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, File::Dir(_))
    }

    pub fn full_path(&self) -> &str {
        match self {
            File::Bytes(f) => f.full_path(),
            File::Dir(d) => d.full_path(),
            File::Hooked(h) => h.inner().full_path(),
        }
    }

    pub fn file_name(&self) -> &str {
        paths::base_name(self.full_path())
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            File::Bytes(f) => f.size(),
            File::Dir(_) => None,
            File::Hooked(h) => h.inner().size(),
        }
    }

    pub fn mod_time(&self) -> Option<DateTime<Utc>> {
        match self {
            File::Bytes(f) => f.mod_time(),
            File::Dir(d) => d.mod_time(),
            File::Hooked(h) => h.inner().mod_time(),
        }
    }

    pub fn media_type(&self) -> String {
        match self {
            File::Bytes(f) => f.media_type(),
            File::Dir(_) => DIRECTORY_MEDIA_TYPE.to_string(),
            File::Hooked(h) => h.inner().media_type(),
        }
    }

    /// Read bytes from the file. Fails with [`FsError::NotAFile`] on a
    /// directory. Returns 0 at end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        match self {
            File::Bytes(f) => f.read(buf).await,
            File::Dir(_) => Err(FsError::NotAFile),
            File::Hooked(h) => h.inner_mut().read(buf).await,
        }
    }

    /// Consume the remaining content. Fails with [`FsError::NotAFile`] on a
    /// directory.
    pub async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        match self {
            File::Bytes(f) => f.read_to_end().await,
            File::Dir(_) => Err(FsError::NotAFile),
            File::Hooked(h) => h.inner_mut().read_to_end().await,
        }
    }

    /// Release underlying resources. Double-close is a no-op.
    pub fn close(&mut self) -> FsResult<()> {
        match self {
            File::Bytes(f) => f.close(),
            File::Dir(_) => Ok(()),
            File::Hooked(h) => h.inner_mut().close(),
        }
    }

    /// The next child of a directory, or `None` once exhausted. Fails with
    /// [`FsError::NotADirectory`] on a byte file.
    pub fn next_child(&mut self) -> FsResult<Option<File>> {
        match self {
            File::Dir(d) => Ok(d.next_child()),
            _ => Err(FsError::NotADirectory),
        }
    }

    pub(crate) fn set_full_path(&mut self, path: String) {
        match self {
            File::Bytes(f) => f.set_full_path(path),
            File::Dir(d) => d.set_full_path(path),
            File::Hooked(h) => h.inner_mut().set_full_path(path),
        }
    }
}

/// Visitor invoked by [`walk`]. Receives ownership of each visited file.
#[async_trait]
pub trait WalkVisitor: Send {
    async fn visit(&mut self, file: File) -> FsResult<()>;
}

/// Depth-first post-order traversal of a file tree.
///
/// For a directory, every child is walked first (in `next_child` order) and
/// the directory itself is visited last; byte files are visited directly.
/// Post-order is load-bearing: batched writes rely on every child being
/// handled before its parent directory is assembled.
pub fn walk<'a, V>(mut file: File, visitor: &'a mut V) -> BoxFuture<'a, FsResult<()>>
where
    V: WalkVisitor,
{
    async move {
        if file.is_directory() {
            while let Some(child) = file.next_child()? {
                walk(child, visitor).await?;
            }
        }
        visitor.visit(file).await
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PathCollector(Vec<String>);

    #[async_trait]
    impl WalkVisitor for PathCollector {
        async fn visit(&mut self, file: File) -> FsResult<()> {
            self.0.push(file.full_path().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn bytes_file_reads_and_reports_size() {
        let mut f = File::from_bytes("/a/b.txt", b"hello".to_vec());
        assert_eq!(f.size(), Some(5));
        assert_eq!(f.file_name(), "b.txt");
        assert_eq!(f.full_path(), "/a/b.txt");
        assert!(!f.is_directory());

        let data = f.read_to_end().await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn reader_file_has_unknown_size() {
        let reader: Box<dyn AsyncRead + Send + Unpin> =
            Box::new(std::io::Cursor::new(b"streamed".to_vec()));
        let mut f = File::from_reader("/a/stream.bin", reader);
        assert_eq!(f.size(), None);
        assert_eq!(f.read_to_end().await.unwrap(), b"streamed");
    }

    #[tokio::test]
    async fn reading_a_directory_fails() {
        let mut d = File::dir("/a", vec![]);
        let mut buf = [0u8; 4];
        assert!(matches!(d.read(&mut buf).await, Err(FsError::NotAFile)));
        assert_eq!(d.media_type(), DIRECTORY_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn next_child_on_a_file_fails() {
        let mut f = File::from_bytes("/a/b.txt", vec![]);
        assert!(matches!(f.next_child(), Err(FsError::NotADirectory)));
    }

    #[test]
    fn directory_exhausts_to_sentinel() {
        let mut d = File::dir(
            "/a",
            vec![File::from_bytes("one.txt", vec![]), File::from_bytes("two.txt", vec![])],
        );
        assert!(d.next_child().unwrap().is_some());
        assert!(d.next_child().unwrap().is_some());
        assert!(d.next_child().unwrap().is_none());
        assert!(d.next_child().unwrap().is_none());
    }

    #[test]
    fn children_are_rerooted_under_parent() {
        let d = File::dir(
            "/a",
            vec![
                File::from_bytes("b.txt", vec![]),
                // full input path also re-roots to the parent
                File::from_bytes("/somewhere/else/c.txt", vec![]),
                File::dir("sub", vec![File::from_bytes("d.txt", vec![])]),
            ],
        );
        let mut d = d;
        let b = d.next_child().unwrap().unwrap();
        assert_eq!(b.full_path(), "/a/b.txt");
        let c = d.next_child().unwrap().unwrap();
        assert_eq!(c.full_path(), "/a/c.txt");
        let mut sub = d.next_child().unwrap().unwrap();
        assert_eq!(sub.full_path(), "/a/sub");
        let nested = sub.next_child().unwrap().unwrap();
        assert_eq!(nested.full_path(), "/a/sub/d.txt");
    }

    #[tokio::test]
    async fn close_twice_is_a_noop() {
        let mut f = File::from_bytes("/a/b.txt", b"data".to_vec());
        f.close().unwrap();
        f.close().unwrap();
        // closed file reads as EOF
        let mut buf = [0u8; 4];
        assert_eq!(f.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn walk_is_post_order() {
        let tree = File::dir(
            "/a",
            vec![
                File::from_bytes("b.txt", b"a".to_vec()),
                File::dir("c", vec![File::from_bytes("d.txt", b"d".to_vec())]),
                File::from_bytes("e.txt", b"e".to_vec()),
            ],
        );

        let mut collector = PathCollector(Vec::new());
        walk(tree, &mut collector).await.unwrap();
        assert_eq!(
            collector.0,
            vec!["/a/b.txt", "/a/c/d.txt", "/a/c", "/a/e.txt", "/a"]
        );
    }

    #[test]
    fn media_type_guessed_from_extension() {
        let f = File::from_bytes("/docs/readme.txt", vec![]);
        assert_eq!(f.media_type(), "text/plain");

        let j = File::from_bytes("/data/out.json", vec![]);
        assert_eq!(j.media_type(), "application/json");
    }
}
