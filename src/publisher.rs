//! Asynchronous and file-backed handler results.
//!
//! These are the values a handler returns when the response body is not
//! available as a single in-memory value:
//!
//! - [`Deferred`] - a future resolving to one value
//! - [`Single`] - a future resolving to zero or one value
//! - [`Chunked`] - a stream of values, written one chunk per item
//! - [`Source`] - a reader, file handle or path copied to the body
//! - [`Attachment`] - a [`Source`] sent as a download

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::{PipelineError, Result};
use crate::handler::{BoxFuture, IntoReply, Reply, Shape};
use crate::media::MediaType;
use crate::payload::Payload;

/// Boxed readable body source.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// An asynchronous result awaiting adaptation.
pub enum Publisher {
    Deferred(BoxFuture<'static, Result<Payload>>),
    Single(BoxFuture<'static, Result<Option<Payload>>>),
    Stream(BoxStream<'static, Result<Payload>>),
    Source(Source),
}

impl Publisher {
    pub fn kind(&self) -> &'static str {
        match self {
            Publisher::Deferred(_) => "deferred",
            Publisher::Single(_) => "single",
            Publisher::Stream(_) => "stream",
            Publisher::Source(source) => source.kind(),
        }
    }
}

/// A body read from somewhere other than memory.
pub enum Source {
    Reader(BoxReader),
    Path(PathBuf),
    File(tokio::fs::File),
}

impl Source {
    pub fn reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Source::Reader(Box::new(reader))
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Source::Path(path.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Source::Reader(_) => "reader",
            Source::Path(_) => "path",
            Source::File(_) => "file",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

impl IntoReply for Source {
    const SHAPE: Shape = Shape::Source;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Source(self)))
    }
}

impl IntoReply for tokio::fs::File {
    const SHAPE: Shape = Shape::Source;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Source(Source::File(self))))
    }
}

impl IntoReply for PathBuf {
    const SHAPE: Shape = Shape::Source;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Source(Source::Path(self))))
    }
}

/// Open `path` for reading. A missing file is [`PipelineError::NotFound`].
pub(crate) async fn open(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::NotFound(path.to_path_buf())
        } else {
            PipelineError::Io(e)
        }
    })
}

/// A file download.
#[derive(Debug)]
pub struct Attachment {
    source: Source,
    file_name: String,
    content_type: Option<MediaType>,
    inline: bool,
}

impl Attachment {
    /// Download of the file at `path`, named after its last component.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source: Source::Path(path),
            file_name,
            content_type: None,
            inline: false,
        }
    }

    /// Download of arbitrary content under `file_name`.
    pub fn from_source(source: Source, file_name: impl Into<String>) -> Self {
        Self {
            source,
            file_name: file_name.into(),
            content_type: None,
            inline: false,
        }
    }

    /// Render in the browser instead of prompting a download.
    pub fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub fn content_type(mut self, media: MediaType) -> Self {
        self.content_type = Some(media);
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Explicit type, otherwise guessed from the file name.
    pub fn media_type(&self) -> MediaType {
        self.content_type
            .clone()
            .unwrap_or_else(|| MediaType::for_path(Path::new(&self.file_name)))
    }

    /// `Content-Disposition` header value.
    pub fn disposition(&self) -> String {
        let kind = if self.inline { "inline" } else { "attachment" };
        if self.file_name.is_empty() {
            return kind.to_string();
        }
        let mut escaped = String::with_capacity(self.file_name.len());
        for c in self.file_name.chars() {
            match c {
                '\\' | '"' => {
                    escaped.push('\\');
                    escaped.push(c);
                }
                // CR/LF and other controls would end the header line.
                c if c.is_control() => escaped.push('_'),
                c => escaped.push(c),
            }
        }
        format!("{kind}; filename=\"{escaped}\"")
    }

    pub(crate) fn into_source(self) -> Source {
        self.source
    }
}

impl IntoReply for Attachment {
    const SHAPE: Shape = Shape::Attachment;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Attachment(self))
    }
}

/// A value produced later.
pub struct Deferred(BoxFuture<'static, Result<Payload>>);

impl Deferred {
    pub fn new<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Into<Payload>,
    {
        Deferred(Box::pin(async move { future.await.map(Into::into) }))
    }

    /// A serializable value produced later.
    pub fn data<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Serialize,
    {
        Deferred(Box::pin(async move { Payload::data(&future.await?) }))
    }
}

impl IntoReply for Deferred {
    const SHAPE: Shape = Shape::Deferred;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Deferred(self.0)))
    }
}

/// Zero or one value produced later. Completing empty renders `204`.
pub struct Single(BoxFuture<'static, Result<Option<Payload>>>);

impl Single {
    pub fn new<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<Option<T>>> + Send + 'static,
        T: Into<Payload>,
    {
        Single(Box::pin(async move { future.await.map(|v| v.map(Into::into)) }))
    }
}

impl IntoReply for Single {
    const SHAPE: Shape = Shape::Single;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Single(self.0)))
    }
}

/// A stream of values written as they arrive.
pub struct Chunked(BoxStream<'static, Result<Payload>>);

impl Chunked {
    pub fn new<S, T>(stream: S) -> Self
    where
        S: Stream<Item = Result<T>> + Send + 'static,
        T: Into<Payload>,
    {
        Chunked(stream.map(|item| item.map(Into::into)).boxed())
    }

    /// A stream of serializable items.
    pub fn json<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        Chunked(stream.map(|item| Payload::data(&item)).boxed())
    }
}

impl IntoReply for Chunked {
    const SHAPE: Shape = Shape::Stream;

    fn into_reply(self) -> Result<Reply> {
        Ok(Reply::Publisher(Publisher::Stream(self.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_from_path() {
        let attachment = Attachment::new("/tmp/report.pdf");
        assert_eq!(attachment.file_name(), "report.pdf");
        assert_eq!(attachment.media_type().as_str(), "application/pdf");
        assert_eq!(attachment.disposition(), "attachment; filename=\"report.pdf\"");
    }

    #[test]
    fn test_attachment_inline_and_type() {
        let attachment = Attachment::from_source(Source::reader(tokio::io::empty()), "a\"b.txt")
            .inline()
            .content_type(MediaType::HTML);
        assert_eq!(attachment.media_type(), MediaType::HTML);
        assert_eq!(attachment.disposition(), "inline; filename=\"a\\\"b.txt\"");
    }

    #[test]
    fn test_disposition_strips_control_characters() {
        let attachment = Attachment::from_source(
            Source::reader(tokio::io::empty()),
            "evil.txt\r\nSet-Cookie: x=1",
        );
        let value = attachment.disposition();
        assert!(!value.contains('\r') && !value.contains('\n'));
        assert_eq!(value, "attachment; filename=\"evil.txt__Set-Cookie: x=1\"");
    }

    #[test]
    fn test_publisher_kinds() {
        let reply = Deferred::new(async { Ok::<_, PipelineError>("x") })
            .into_reply()
            .unwrap();
        assert_eq!(reply.kind(), "deferred");

        let reply = Source::path("/nope").into_reply().unwrap();
        assert_eq!(reply.kind(), "path");
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let err = open(Path::new("/definitely/not/here")).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_chunked_json_items() {
        let Chunked(stream) = Chunked::json(futures::stream::iter([1, 2]));
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Payload::Data(serde_json::json!(1)));
    }
}
