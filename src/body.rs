use crate::algorithm::Algorithm;
use crate::error::{Error, Result};
use crate::output::{Head, Output};
use crate::sink::{CompressingSink, State};
use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

pin_project! {
    /// A response body that may be compressed.
    ///
    /// Bodies of responses for which an algorithm was negotiated run through a
    /// [`CompressingSink`]; all others pass through unchanged.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Body fed through the compressing sink.
        Compressed {
            inner: Pin<Box<B>>,
            state: CompressedBody,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
        },
        /// The body failed before the framing was decided.
        Failed {
            error: Option<io::Error>,
        },
    }
}

/// Collects what a [`CompressingSink`] emits as body frames.
#[derive(Debug, Default)]
pub(crate) struct FrameQueue {
    head: Option<Head>,
    frames: VecDeque<Bytes>,
    closed: bool,
}

impl FrameQueue {
    fn remaining(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}

impl Output for FrameQueue {
    fn begin(&mut self, status: StatusCode, reason: &str, headers: HeaderMap) -> Result<()> {
        if self.head.is_some() {
            return Err(Error::Protocol("response already begun"));
        }
        self.head = Some(Head::new(status, reason, headers));
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Protocol("write after response closed"));
        }
        if !chunk.is_empty() {
            self.frames.push_back(Bytes::copy_from_slice(chunk));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// State for a body running through the compressing sink.
pub struct CompressedBody {
    sink: CompressingSink<FrameQueue>,
    always_flush: bool,
    pending_trailers: Option<HeaderMap>,
}

impl CompressedBody {
    pub(crate) fn new(algorithm: Arc<dyn Algorithm>, threshold: usize, always_flush: bool) -> Self {
        Self {
            sink: CompressingSink::new(FrameQueue::default(), algorithm, threshold),
            always_flush,
            pending_trailers: None,
        }
    }

    /// Hands the response head to the sink.
    pub(crate) fn begin(&mut self, status: StatusCode, headers: HeaderMap) -> io::Result<()> {
        let reason = status.canonical_reason().unwrap_or("");
        Ok(self.sink.begin(status, reason, headers)?)
    }

    /// Takes the head the sink decided on, once it has been emitted.
    pub(crate) fn take_head(&mut self) -> Option<Head> {
        self.sink.get_mut().head.take()
    }

    fn is_finished(&self) -> bool {
        self.sink.state() == State::Finished
    }

    /// Polls one frame from the inner body and feeds it into the sink.
    pub(crate) fn poll_feed<B>(
        &mut self,
        cx: &mut Context<'_>,
        inner: Pin<&mut B>,
    ) -> Poll<io::Result<()>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        match ready!(inner.poll_frame(cx)) {
            None => self.sink.finish()?,
            Some(Err(e)) => return Poll::Ready(Err(io::Error::other(e.into()))),
            Some(Ok(frame)) => match frame.into_data() {
                Ok(mut data) => {
                    while data.has_remaining() {
                        let chunk = data.chunk();
                        let len = chunk.len();
                        self.sink.write(chunk)?;
                        data.advance(len);
                    }
                    if self.always_flush {
                        self.sink.flush()?;
                    }
                }
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        // Trailers end the body
                        self.pending_trailers = Some(trailers);
                        self.sink.finish()?;
                    }
                }
            },
        }
        Poll::Ready(Ok(()))
    }

    /// Yields queued output, feeding the sink from the inner body as needed.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            if let Some(data) = self.sink.get_mut().frames.pop_front() {
                return Poll::Ready(Some(Ok(Frame::data(data))));
            }

            if self.is_finished() {
                return Poll::Ready(self.pending_trailers.take().map(|t| Ok(Frame::trailers(t))));
            }

            ready!(self.poll_feed(cx, inner.as_mut()))?;
        }
    }
}

impl<B> CompressionBody<B> {
    /// Creates a body fed through the given compression state.
    pub(crate) fn compressed(inner: Pin<Box<B>>, state: CompressedBody) -> Self {
        Self::Compressed { inner, state }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough { inner }
    }

    /// Creates a body that yields `error` and ends.
    pub(crate) fn failed(error: io::Error) -> Self {
        Self::Failed { error: Some(error) }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner } => {
                // Pass through frames, converting data to Bytes
                match ready!(inner.poll_frame(cx)) {
                    None => Poll::Ready(None),
                    Some(Ok(frame)) => {
                        let frame = frame.map_data(|mut data| {
                            let mut bytes = BytesMut::with_capacity(data.remaining());
                            while data.has_remaining() {
                                let chunk = data.chunk();
                                bytes.extend_from_slice(chunk);
                                let len = chunk.len();
                                data.advance(len);
                            }
                            bytes.freeze()
                        });
                        Poll::Ready(Some(Ok(frame)))
                    }
                    Some(Err(e)) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                }
            }
            CompressionBodyProj::Compressed { inner, state } => {
                state.poll_compressed(cx, inner.as_mut())
            }
            CompressionBodyProj::Failed { error } => Poll::Ready(error.take().map(Err)),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner } => inner.is_end_stream(),
            CompressionBody::Compressed { state, .. } => {
                state.is_finished()
                    && state.sink.get_ref().frames.is_empty()
                    && state.pending_trailers.is_none()
            }
            CompressionBody::Failed { error } => error.is_none(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough { inner } => inner.size_hint(),
            CompressionBody::Compressed { state, .. } if state.is_finished() => {
                http_body::SizeHint::with_exact(state.sink.get_ref().remaining() as u64)
            }
            // Compressed size is unknown
            _ => http_body::SizeHint::default(),
        }
    }
}
