//! Feed byte sources
//!
//! A source opens a fresh, finite stream of byte chunks each time it is asked.
//! Chunk boundaries are arbitrary. Dropping the stream releases the
//! underlying connection or file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::ACCEPT;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::TransportError;

/// Chunked feed body
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Start delivering the feed document.
    async fn open(&self) -> Result<ByteStream, TransportError>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Streams the feed over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(concat!("jobfeed-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn open(&self) -> Result<ByteStream, TransportError> {
        info!(url = %self.url, "Requesting feed");

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/xml")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        debug!(
            status = status.as_u16(),
            content_length = ?response.content_length(),
            "Feed response received"
        );

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Replays a feed document saved on disk.
#[derive(Debug, Clone)]
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FeedSource for FileFeedSource {
    async fn open(&self) -> Result<ByteStream, TransportError> {
        let file = tokio::fs::File::open(&self.path).await?;
        debug!(path = %self.path.display(), "Opened feed file");

        Ok(ReaderStream::new(file)
            .map(|chunk| chunk.map_err(TransportError::Io))
            .boxed())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed in-memory document delivered in equal-sized chunks.
///
/// Can be told to break the connection after a number of chunks.
#[derive(Debug, Clone)]
pub struct MemoryFeedSource {
    data: Bytes,
    chunk_size: usize,
    fail_after: Option<usize>,
}

impl MemoryFeedSource {
    /// `chunk_size` of zero delivers the whole document as one chunk.
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size,
            fail_after: None,
        }
    }

    /// Deliver `chunks` chunks, then fail with an interrupted transport.
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    fn chunks(&self) -> Vec<Bytes> {
        let len = self.data.len();
        let size = if self.chunk_size == 0 {
            len.max(1)
        } else {
            self.chunk_size
        };

        (0..len)
            .step_by(size)
            .map(|start| self.data.slice(start..(start + size).min(len)))
            .collect()
    }
}

#[async_trait]
impl FeedSource for MemoryFeedSource {
    async fn open(&self) -> Result<ByteStream, TransportError> {
        let mut items: Vec<Result<Bytes, TransportError>> =
            self.chunks().into_iter().map(Ok).collect();

        if let Some(limit) = self.fail_after {
            items.truncate(limit);
            items.push(Err(TransportError::Interrupted(format!(
                "connection reset after {limit} chunk(s)"
            ))));
        }

        Ok(stream::iter(items).boxed())
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.data.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn collect(source: &dyn FeedSource) -> Result<Vec<Bytes>, TransportError> {
        source.open().await?.try_collect().await
    }

    #[tokio::test]
    async fn test_memory_source_chunks() {
        let source = MemoryFeedSource::new("abcdefg", 3);
        let chunks = collect(&source).await.unwrap();
        assert_eq!(chunks, vec![Bytes::from("abc"), Bytes::from("def"), Bytes::from("g")]);
    }

    #[tokio::test]
    async fn test_memory_source_whole_document() {
        let source = MemoryFeedSource::new("abcdefg", 0);
        assert_eq!(collect(&source).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_source_empty_document() {
        let source = MemoryFeedSource::new(Bytes::new(), 4);
        assert!(collect(&source).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_source_fail_after() {
        let source = MemoryFeedSource::new("abcdefg", 2).fail_after(2);
        let mut stream = source.open().await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("ab"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("cd"));
        assert!(matches!(
            stream.next().await,
            Some(Err(TransportError::Interrupted(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_memory_source_reopens_from_start() {
        let source = MemoryFeedSource::new("abc", 1);
        assert_eq!(collect(&source).await.unwrap().len(), 3);
        assert_eq!(collect(&source).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = FileFeedSource::new("/nonexistent/feed.xml");
        assert!(matches!(source.open().await, Err(TransportError::Io(_))));
    }
}
