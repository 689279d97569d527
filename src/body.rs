//! Definitions for the Response body.
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame, SizeHint};

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
///
/// Every response the engine produces is fully built in memory, so a
/// body is either empty or a single chunk of bytes.
#[derive(Debug, Default)]
pub struct Body {
    inner: Option<Bytes>,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body { inner: None }
    }

    /// The bytes that have not been polled yet.
    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_deref().unwrap_or(b"")
    }

    /// Take the whole body as `Bytes`.
    pub fn into_bytes(self) -> Bytes {
        self.inner.unwrap_or_default()
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.inner.take().filter(|b| !b.is_empty()).map(Ok))
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.inner.take().filter(|b| !b.is_empty()).map(|b| Ok(Frame::data(b))))
    }

    fn is_end_stream(&self) -> bool {
        self.inner.as_ref().is_none_or(|b| b.is_empty())
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.inner.as_ref().map(|b| b.len() as u64).unwrap_or(0))
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body {
            inner: Some(Bytes::from(t)),
        }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body {
            inner: Some(Bytes::from(t.to_string())),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body {
            inner: Some(Bytes::from(t)),
        }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body { inner: Some(t) }
    }
}
