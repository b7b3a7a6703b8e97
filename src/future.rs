use crate::algorithm::Algorithm;
use crate::body::{CompressedBody, CompressionBody};
use bytes::Buf;
use http::response::Parts;
use http::{HeaderMap, Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    ///
    /// Once the inner service responds, the body is read until the response
    /// framing is decided: compressed once more than the threshold has been
    /// read, or uncompressed with an exact `Content-Length` if the body ends
    /// first.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        threshold: usize,
        state: State<B>,
    }
}

enum State<B> {
    Waiting {
        algorithm: Option<Arc<dyn Algorithm>>,
    },
    Buffering {
        parts: Parts,
        body: Pin<Box<B>>,
        compressed: CompressedBody,
    },
    Done,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, algorithm: Option<Arc<dyn Algorithm>>, threshold: usize) -> Self {
        Self {
            inner,
            threshold,
            state: State::Waiting { algorithm },
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match mem::replace(this.state, State::Done) {
                State::Waiting { algorithm } => {
                    let response = match this.inner.as_mut().poll(cx) {
                        Poll::Pending => {
                            *this.state = State::Waiting { algorithm };
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(response)) => response,
                    };

                    match wrap_response(response, algorithm, *this.threshold) {
                        Wrapped::Ready(response) => return Poll::Ready(Ok(response)),
                        Wrapped::Buffering(state) => *this.state = state,
                    }
                }
                State::Buffering {
                    mut parts,
                    mut body,
                    mut compressed,
                } => match compressed.poll_feed(cx, body.as_mut()) {
                    Poll::Pending => {
                        *this.state = State::Buffering {
                            parts,
                            body,
                            compressed,
                        };
                        return Poll::Pending;
                    }
                    Poll::Ready(Err(error)) => {
                        tracing::debug!(%error, "response body failed before compression decision");
                        let body = CompressionBody::failed(error);
                        return Poll::Ready(Ok(Response::from_parts(parts, body)));
                    }
                    Poll::Ready(Ok(())) => match compressed.take_head() {
                        Some(head) => {
                            if head.headers.contains_key(header::CONTENT_ENCODING) {
                                // Ranges no longer apply to the encoded body
                                parts.headers = head.headers;
                                parts.headers.remove(header::ACCEPT_RANGES);
                            } else {
                                parts.headers = head.headers;
                            }
                            parts.status = head.status;
                            let body = CompressionBody::compressed(body, compressed);
                            return Poll::Ready(Ok(Response::from_parts(parts, body)));
                        }
                        None => {
                            *this.state = State::Buffering {
                                parts,
                                body,
                                compressed,
                            };
                        }
                    },
                },
                State::Done => panic!("ResponseFuture polled after completion"),
            }
        }
    }
}

enum Wrapped<B> {
    Ready(Response<CompressionBody<B>>),
    Buffering(State<B>),
}

/// Hands the response to a compressing sink if it is eligible.
fn wrap_response<B>(
    response: Response<B>,
    algorithm: Option<Arc<dyn Algorithm>>,
    threshold: usize,
) -> Wrapped<B>
where
    B: Body,
{
    let (parts, body) = response.into_parts();

    let eligible = !has_content_encoding(&parts.headers)
        && !has_content_range(&parts.headers)
        && !is_uncompressible_content_type(&parts.headers)
        && !is_within_threshold(&parts.headers, threshold)
        && !body.is_end_stream();

    let Some(algorithm) = algorithm.filter(|_| eligible) else {
        tracing::trace!(status = %parts.status, "response not compressed");
        return Wrapped::Ready(Response::from_parts(parts, CompressionBody::passthrough(body)));
    };

    // Check for x-accel-buffering: no header or streaming content types
    let always_flush = parts
        .headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"))
        || is_streaming_content_type(&parts.headers);

    let mut compressed = CompressedBody::new(algorithm, threshold, always_flush);
    if let Err(error) = compressed.begin(parts.status, parts.headers.clone()) {
        return Wrapped::Ready(Response::from_parts(parts, CompressionBody::failed(error)));
    }

    Wrapped::Buffering(State::Buffering {
        parts,
        body: Box::pin(body),
        compressed,
    })
}

/// Checks if Content-Encoding header is already present.
fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_ENCODING)
}

/// Checks if Content-Range header is present (range response).
fn has_content_range(headers: &HeaderMap) -> bool {
    headers.contains_key(header::CONTENT_RANGE)
}

/// Checks if the content type should not be compressed.
fn is_uncompressible_content_type(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    // Skip all images except SVG
    if content_type.starts_with("image/") {
        return !content_type.starts_with("image/svg+xml");
    }

    // Skip gRPC except grpc-web
    if content_type.starts_with("application/grpc") {
        return !content_type.starts_with("application/grpc-web");
    }

    false
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}

/// Checks if a declared Content-Length would never exceed the threshold.
fn is_within_threshold(headers: &HeaderMap, threshold: usize) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len <= threshold)
}
