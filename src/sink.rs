use crate::algorithm::{Algorithm, Encoder};
use crate::error::{Error, Result};
use crate::output::{Head, Output};
use bytes::BytesMut;
use compression_core::Level;
use http::{HeaderMap, StatusCode, header};
use std::fmt;
use std::sync::Arc;

/// Default number of bytes buffered before switching to compression.
pub const DEFAULT_THRESHOLD: usize = 500;

/// Observable phase of a [`CompressingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Collecting the head and body, no framing decided yet.
    Buffering,
    /// Head sent with `Content-Encoding`, body streaming through the encoder.
    Compressing,
    /// Head sent with an exact `Content-Length`, body written verbatim.
    PassedThrough,
    /// Response completed and the underlying output closed.
    Finished,
}

enum Phase {
    Buffering {
        head: Option<Head>,
        buffer: BytesMut,
    },
    Compressing {
        encoder: Box<dyn Encoder>,
    },
    PassedThrough,
    Finished,
}

/// An [`Output`] deciding late whether to compress.
///
/// The response head and body are held back until either more than
/// `threshold` bytes have been written or the caller flushes. At that point
/// the head goes out with `Content-Encoding` and the body is streamed through
/// the algorithm's encoder. If the response completes before that, it is sent
/// uncompressed with an exact `Content-Length` instead.
pub struct CompressingSink<O> {
    inner: O,
    algorithm: Arc<dyn Algorithm>,
    threshold: usize,
    phase: Phase,
}

impl<O> CompressingSink<O> {
    /// Wraps `inner`, compressing with `algorithm` once `threshold` is exceeded.
    pub fn new(inner: O, algorithm: Arc<dyn Algorithm>, threshold: usize) -> Self {
        Self {
            inner,
            algorithm,
            threshold,
            phase: Phase::Buffering {
                head: None,
                buffer: BytesMut::new(),
            },
        }
    }

    /// Returns the current phase.
    pub fn state(&self) -> State {
        match self.phase {
            Phase::Buffering { .. } => State::Buffering,
            Phase::Compressing { .. } => State::Compressing,
            Phase::PassedThrough => State::PassedThrough,
            Phase::Finished => State::Finished,
        }
    }

    /// Returns the algorithm used once compression starts.
    pub fn algorithm(&self) -> &Arc<dyn Algorithm> {
        &self.algorithm
    }

    /// Returns the buffering threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns a reference to the wrapped output.
    pub fn get_ref(&self) -> &O {
        &self.inner
    }

    /// Returns a mutable reference to the wrapped output.
    pub fn get_mut(&mut self) -> &mut O {
        &mut self.inner
    }

    /// Consumes this sink, returning the wrapped output.
    pub fn into_inner(self) -> O {
        self.inner
    }
}

impl<O: Output> CompressingSink<O> {
    /// Sends the head with compression headers and moves the buffered body
    /// into a fresh encoder.
    fn start(&mut self) -> Result<()> {
        let Phase::Buffering { head, buffer } = &mut self.phase else {
            return Err(Error::Protocol("compression already started"));
        };
        if head.is_none() {
            return Err(Error::Protocol("response not begun"));
        }
        let mut encoder = self.algorithm.encoder(Level::Fastest)?;
        let Some(Head {
            status,
            reason,
            mut headers,
        }) = head.take()
        else {
            return Err(Error::Protocol("response not begun"));
        };
        let buffered = std::mem::take(buffer);

        add_vary_accept_encoding(&mut headers);
        headers.insert(
            header::CONTENT_ENCODING,
            header::HeaderValue::from_str(self.algorithm.token())
                .map_err(|_| Error::Protocol("algorithm token is not a valid header value"))?,
        );
        // Compressed size is unknown, the output falls back to chunked framing
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(
            algorithm = self.algorithm.token(),
            buffered = buffered.len(),
            "starting compression"
        );

        self.inner.begin(status, &reason, headers)?;
        encoder.write(&buffered, &mut self.inner)?;
        self.phase = Phase::Compressing { encoder };
        Ok(())
    }

    /// Completes the response, compressed or not, and closes the wrapped output.
    pub fn finish(&mut self) -> Result<()> {
        match &mut self.phase {
            Phase::Compressing { encoder } => {
                encoder.finish(&mut self.inner)?;
                tracing::debug!(compression = self.algorithm.name(), "response finished");
            }
            Phase::Buffering { head, buffer } => {
                let Some(Head {
                    status,
                    reason,
                    mut headers,
                }) = head.take()
                else {
                    return Err(Error::Protocol("response not begun"));
                };
                let buffered = std::mem::take(buffer);
                self.phase = Phase::PassedThrough;

                headers.insert(
                    header::CONTENT_LENGTH,
                    header::HeaderValue::from(buffered.len()),
                );
                self.inner.begin(status, &reason, headers)?;
                self.inner.write(&buffered)?;
                tracing::debug!(
                    compression = "(skipped)",
                    length = buffered.len(),
                    "response finished"
                );
            }
            Phase::PassedThrough | Phase::Finished => {
                return Err(Error::Protocol("response already finished"));
            }
        }

        self.phase = Phase::Finished;
        self.inner.close()
    }
}

impl<O: Output> Output for CompressingSink<O> {
    /// Captures the head; nothing is sent until the framing is decided.
    fn begin(&mut self, status: StatusCode, reason: &str, headers: HeaderMap) -> Result<()> {
        match &mut self.phase {
            Phase::Buffering { head: head @ None, .. } => {
                *head = Some(Head::new(status, reason, headers));
                Ok(())
            }
            _ => Err(Error::Protocol("response already begun")),
        }
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        match &mut self.phase {
            Phase::Compressing { encoder } => encoder.write(chunk, &mut self.inner),
            Phase::Buffering { buffer, .. } => {
                buffer.extend_from_slice(chunk);
                if buffer.len() > self.threshold {
                    self.start()?;
                }
                Ok(())
            }
            Phase::PassedThrough | Phase::Finished => {
                Err(Error::Protocol("write after response finished"))
            }
        }
    }

    /// Forces compression if still buffering, then flushes the encoder.
    fn flush(&mut self) -> Result<()> {
        if let Phase::Buffering { .. } = self.phase {
            self.start()?;
        }
        match &mut self.phase {
            Phase::Compressing { encoder } => encoder.flush(&mut self.inner),
            _ => Err(Error::Protocol("flush after response finished")),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.finish()
    }
}

impl<O: fmt::Debug> fmt::Debug for CompressingSink<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressingSink")
            .field("inner", &self.inner)
            .field("algorithm", &self.algorithm.token())
            .field("threshold", &self.threshold)
            .field("state", &self.state())
            .finish()
    }
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let covered = headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|vary| vary.to_str().ok())
        .flat_map(|vary| vary.split(','))
        .any(|v| {
            let v = v.trim();
            v == "*" || v.eq_ignore_ascii_case("accept-encoding")
        });

    if !covered {
        headers.append(
            header::VARY,
            header::HeaderValue::from_static("Accept-Encoding"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::WireOutput;
    use crate::testing::Marker;

    fn sink() -> CompressingSink<WireOutput<Vec<u8>>> {
        CompressingSink::new(
            WireOutput::new(Vec::new()),
            Arc::new(Marker),
            DEFAULT_THRESHOLD,
        )
    }

    fn text_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers
    }

    fn wire(sink: CompressingSink<WireOutput<Vec<u8>>>) -> String {
        String::from_utf8(sink.into_inner().into_inner()).unwrap()
    }

    #[test]
    fn test_compresses_above_threshold() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", text_headers()).unwrap();
        sink.write(&[b'*'; 512]).unwrap();
        assert_eq!(sink.state(), State::Compressing);
        sink.close().unwrap();
        assert_eq!(sink.state(), State::Finished);

        assert_eq!(
            wire(sink),
            "HTTP/1.1 200 OK\r\n\
             content-type: text/plain; charset=utf-8\r\n\
             vary: Accept-Encoding\r\n\
             content-encoding: test\r\n\
             transfer-encoding: chunked\r\n\
             \r\n\
             10\r\n<compressed:512>\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn test_passes_through_below_threshold() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", text_headers()).unwrap();
        sink.write(b"Test").unwrap();
        assert_eq!(sink.state(), State::Buffering);
        sink.close().unwrap();

        assert_eq!(
            wire(sink),
            "HTTP/1.1 200 OK\r\n\
             content-type: text/plain; charset=utf-8\r\n\
             content-length: 4\r\n\
             \r\n\
             Test"
        );
    }

    #[test]
    fn test_flush_forces_compression() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", text_headers()).unwrap();
        sink.write(b"Test").unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.state(), State::Compressing);
        sink.close().unwrap();

        assert_eq!(
            wire(sink),
            "HTTP/1.1 200 OK\r\n\
             content-type: text/plain; charset=utf-8\r\n\
             vary: Accept-Encoding\r\n\
             content-encoding: test\r\n\
             transfer-encoding: chunked\r\n\
             \r\n\
             e\r\n<compressed:4>\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        sink.write(&[b'*'; DEFAULT_THRESHOLD]).unwrap();
        assert_eq!(sink.state(), State::Buffering);
        sink.write(b"*").unwrap();
        assert_eq!(sink.state(), State::Compressing);
    }

    #[test]
    fn test_accumulates_small_writes() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        for _ in 0..5 {
            sink.write(&[b'*'; 100]).unwrap();
        }
        assert_eq!(sink.state(), State::Buffering);

        // Crossing the threshold compresses the whole buffer at once, later
        // writes go straight to the encoder.
        sink.write(&[b'*'; 100]).unwrap();
        sink.write(b"tail").unwrap();
        sink.close().unwrap();

        assert!(
            wire(sink).ends_with("10\r\n<compressed:600>\r\ne\r\n<compressed:4>\r\n0\r\n\r\n")
        );
    }

    #[test]
    fn test_keeps_status_and_reason() {
        let mut sink = sink();
        sink.begin(StatusCode::NOT_FOUND, "Nope", HeaderMap::new())
            .unwrap();
        sink.write(b"missing").unwrap();
        sink.close().unwrap();

        assert!(wire(sink).starts_with("HTTP/1.1 404 Nope\r\ncontent-length: 7\r\n"));
    }

    #[test]
    fn test_content_length_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(9999usize));

        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", headers).unwrap();
        sink.write(b"Test").unwrap();
        sink.close().unwrap();

        assert_eq!(wire(sink), "HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\nTest");
    }

    #[test]
    fn test_content_length_removed_when_compressing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(4usize));

        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", headers).unwrap();
        sink.write(b"Test").unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        let wire = wire(sink);
        assert!(!wire.contains("content-length"));
        assert!(wire.contains("transfer-encoding: chunked\r\n"));
    }

    #[test]
    fn test_vary_appended() {
        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, header::HeaderValue::from_static("Origin"));

        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", headers).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        assert!(wire(sink).contains("vary: Origin\r\nvary: Accept-Encoding\r\n"));
    }

    #[test]
    fn test_vary_not_duplicated() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::VARY,
            header::HeaderValue::from_static("origin, accept-encoding"),
        );
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get_all(header::VARY).iter().count(), 1);

        let mut headers = HeaderMap::new();
        headers.insert(header::VARY, header::HeaderValue::from_static("*"));
        add_vary_accept_encoding(&mut headers);
        assert_eq!(headers.get(header::VARY).unwrap(), "*");
    }

    #[test]
    fn test_content_encoding_overrides_caller() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_ENCODING,
            header::HeaderValue::from_static("identity"),
        );

        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", headers).unwrap();
        sink.flush().unwrap();
        sink.close().unwrap();

        let wire = wire(sink);
        assert!(wire.contains("content-encoding: test\r\n"));
        assert!(!wire.contains("identity"));
    }

    #[test]
    fn test_empty_response_passes_through() {
        let mut sink = sink();
        sink.begin(StatusCode::NO_CONTENT, "No Content", HeaderMap::new())
            .unwrap();
        sink.close().unwrap();

        assert_eq!(
            wire(sink),
            "HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    fn test_begin_twice() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        assert!(matches!(
            sink.begin(StatusCode::OK, "OK", HeaderMap::new()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_begin_after_start() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        sink.flush().unwrap();
        assert!(matches!(
            sink.begin(StatusCode::OK, "OK", HeaderMap::new()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_flush_before_begin() {
        let mut sink = sink();
        sink.write(b"early").unwrap();
        assert!(matches!(sink.flush(), Err(Error::Protocol(_))));
        assert_eq!(sink.state(), State::Buffering);
    }

    #[test]
    fn test_write_after_finish() {
        let mut sink = sink();
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        sink.close().unwrap();

        assert!(matches!(sink.write(b"late"), Err(Error::Protocol(_))));
        assert!(matches!(sink.flush(), Err(Error::Protocol(_))));
        assert!(matches!(sink.close(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unsupported_encoder_propagates() {
        struct Unavailable;

        impl Algorithm for Unavailable {
            fn token(&self) -> &str {
                "none"
            }

            fn name(&self) -> &str {
                "none"
            }

            fn supported(&self) -> bool {
                false
            }

            fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
                Err(Error::Unsupported("none".to_owned()))
            }
        }

        let mut sink = CompressingSink::new(
            WireOutput::new(Vec::new()),
            Arc::new(Unavailable),
            DEFAULT_THRESHOLD,
        );
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        assert!(matches!(sink.flush(), Err(Error::Unsupported(_))));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip_round_trip() {
        use std::io::Read;

        /// Records raw body bytes only.
        #[derive(Default)]
        struct Body(Vec<u8>, Option<HeaderMap>, usize);

        impl Output for Body {
            fn begin(&mut self, _: StatusCode, _: &str, headers: HeaderMap) -> Result<()> {
                self.1 = Some(headers);
                Ok(())
            }

            fn write(&mut self, chunk: &[u8]) -> Result<()> {
                self.0.extend_from_slice(chunk);
                Ok(())
            }

            fn flush(&mut self) -> Result<()> {
                Ok(())
            }

            fn close(&mut self) -> Result<()> {
                self.2 += 1;
                Ok(())
            }
        }

        let payload = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let mut sink = CompressingSink::new(
            Body::default(),
            Arc::new(crate::algorithm::Gzip),
            DEFAULT_THRESHOLD,
        );
        sink.begin(StatusCode::OK, "OK", HeaderMap::new()).unwrap();
        for chunk in payload.as_bytes().chunks(128) {
            sink.write(chunk).unwrap();
        }
        sink.close().unwrap();

        let body = sink.into_inner();
        assert_eq!(body.2, 1);
        let headers = body.1.unwrap();
        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get(header::VARY).unwrap(), "Accept-Encoding");

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(body.0.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }
}
