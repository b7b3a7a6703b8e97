use crate::error::Result;
use crate::output::Output;
use compression_codecs::EncodeV2;
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::fmt;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// A compression algorithm that can be negotiated through `Accept-Encoding`.
///
/// # Example
///
/// ```ignore
/// struct Shout;
///
/// impl Algorithm for Shout {
///     fn token(&self) -> &str { "shout" }
///     fn name(&self) -> &str { "shout" }
///     fn supported(&self) -> bool { true }
///     fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
///         Ok(Box::new(ShoutEncoder))
///     }
/// }
/// ```
pub trait Algorithm: Send + Sync + 'static {
    /// The `Content-Encoding` token, e.g. `"br"`.
    fn token(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Whether this algorithm can be used at runtime.
    fn supported(&self) -> bool;

    /// Creates a stream encoder compressing at the given level.
    fn encoder(&self, level: Level) -> Result<Box<dyn Encoder>>;
}

impl fmt::Debug for dyn Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Algorithm").field(&self.token()).finish()
    }
}

/// A compressing stream writing its output into an [`Output`].
///
/// Encoders never begin or close the sink they write to.
pub trait Encoder: Send {
    /// Compresses `chunk`, writing whatever output is ready to `sink`.
    fn write(&mut self, chunk: &[u8], sink: &mut dyn Output) -> Result<()>;

    /// Emits all pending output so the data written so far can be decoded,
    /// then flushes `sink`.
    fn flush(&mut self, sink: &mut dyn Output) -> Result<()>;

    /// Finalizes the compressed stream.
    fn finish(&mut self, sink: &mut dyn Output) -> Result<()>;
}

/// Brotli, `br`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Brotli;

/// Gzip, `gzip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

/// Bzip2, `bzip2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bzip2;

impl Algorithm for Brotli {
    fn token(&self) -> &str {
        "br"
    }

    fn name(&self) -> &str {
        "brotli"
    }

    fn supported(&self) -> bool {
        cfg!(feature = "brotli")
    }

    #[cfg(feature = "brotli")]
    fn encoder(&self, level: Level) -> Result<Box<dyn Encoder>> {
        use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
        let params = BrotliParams::default().quality(level);
        Ok(Box::new(CodecEncoder::new(BrotliEncoder::new(params))))
    }

    #[cfg(not(feature = "brotli"))]
    fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
        Err(crate::Error::Unsupported(self.token().to_owned()))
    }
}

impl Algorithm for Gzip {
    fn token(&self) -> &str {
        "gzip"
    }

    fn name(&self) -> &str {
        "gzip"
    }

    fn supported(&self) -> bool {
        cfg!(feature = "gzip")
    }

    #[cfg(feature = "gzip")]
    fn encoder(&self, level: Level) -> Result<Box<dyn Encoder>> {
        use compression_codecs::gzip::GzipEncoder;
        Ok(Box::new(CodecEncoder::new(GzipEncoder::new(level.into()))))
    }

    #[cfg(not(feature = "gzip"))]
    fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
        Err(crate::Error::Unsupported(self.token().to_owned()))
    }
}

impl Algorithm for Bzip2 {
    fn token(&self) -> &str {
        "bzip2"
    }

    fn name(&self) -> &str {
        "bzip2"
    }

    fn supported(&self) -> bool {
        cfg!(feature = "bzip2")
    }

    #[cfg(feature = "bzip2")]
    fn encoder(&self, level: Level) -> Result<Box<dyn Encoder>> {
        use compression_codecs::bzip2::BzEncoder;
        // A work factor of 0 selects the library default.
        Ok(Box::new(CodecEncoder::new(BzEncoder::new(level.into(), 0))))
    }

    #[cfg(not(feature = "bzip2"))]
    fn encoder(&self, _level: Level) -> Result<Box<dyn Encoder>> {
        Err(crate::Error::Unsupported(self.token().to_owned()))
    }
}

/// Drives a [`compression_codecs`] encoder, copying its output into the sink.
#[cfg_attr(
    not(any(feature = "brotli", feature = "gzip", feature = "bzip2")),
    allow(dead_code)
)]
struct CodecEncoder {
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
}

#[cfg_attr(
    not(any(feature = "brotli", feature = "gzip", feature = "bzip2")),
    allow(dead_code)
)]
impl CodecEncoder {
    fn new<E: EncodeV2 + Send + 'static>(encoder: E) -> Self {
        Self {
            encoder: Box::new(encoder),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }
    }

    /// Repeats `step` until it reports completion, forwarding output as it goes.
    fn drain(
        &mut self,
        sink: &mut dyn Output,
        step: fn(&mut dyn EncodeV2, &mut WriteBuffer<'_>) -> std::io::Result<bool>,
    ) -> Result<()> {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let done = step(self.encoder.as_mut(), &mut output)?;

            let written = output.written_len();
            if written > 0 {
                sink.write(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }
}

impl Encoder for CodecEncoder {
    fn write(&mut self, chunk: &[u8], sink: &mut dyn Output) -> Result<()> {
        let mut input = PartialBuffer::new(chunk);

        // Keep encoding until all input is consumed
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            self.encoder.encode(&mut input, &mut output)?;

            let written = output.written_len();
            if written > 0 {
                sink.write(&self.output_buffer[..written])?;
            }

            if input.written_len() >= chunk.len() {
                return Ok(());
            }

            // No progress on either side
            if written == 0 && input.written_len() == 0 {
                return Ok(());
            }
        }
    }

    fn flush(&mut self, sink: &mut dyn Output) -> Result<()> {
        self.drain(sink, |encoder, output| encoder.flush(output))?;
        sink.flush()
    }

    fn finish(&mut self, sink: &mut dyn Output) -> Result<()> {
        self.drain(sink, |encoder, output| encoder.finish(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(any(feature = "brotli", feature = "gzip", feature = "bzip2"))]
    use http::{HeaderMap, StatusCode};

    /// Collects raw body bytes, ignoring the head.
    #[cfg(any(feature = "brotli", feature = "gzip", feature = "bzip2"))]
    #[derive(Default)]
    struct Collect {
        body: Vec<u8>,
        flushes: usize,
    }

    #[cfg(any(feature = "brotli", feature = "gzip", feature = "bzip2"))]
    impl Output for Collect {
        fn begin(&mut self, _: StatusCode, _: &str, _: HeaderMap) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, chunk: &[u8]) -> Result<()> {
            self.body.extend_from_slice(chunk);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tokens() {
        assert_eq!(Brotli.token(), "br");
        assert_eq!(Gzip.token(), "gzip");
        assert_eq!(Bzip2.token(), "bzip2");
        assert_eq!(Brotli.name(), "brotli");
    }

    #[test]
    fn test_supported_follows_features() {
        assert_eq!(Brotli.supported(), cfg!(feature = "brotli"));
        assert_eq!(Gzip.supported(), cfg!(feature = "gzip"));
        assert_eq!(Bzip2.supported(), cfg!(feature = "bzip2"));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip_round_trip() {
        use std::io::Read;

        let payload = "hello world ".repeat(100);
        let mut sink = Collect::default();
        let mut encoder = Gzip.encoder(Level::Fastest).unwrap();
        encoder.write(payload.as_bytes(), &mut sink).unwrap();
        encoder.finish(&mut sink).unwrap();

        // Gzip magic
        assert_eq!(&sink.body[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(sink.body.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip_flush_is_decodable() {
        use std::io::Read;

        let mut sink = Collect::default();
        let mut encoder = Gzip.encoder(Level::Fastest).unwrap();
        encoder.write(b"partial", &mut sink).unwrap();
        encoder.flush(&mut sink).unwrap();
        assert_eq!(sink.flushes, 1);

        // Without a trailer the stream is truncated, but everything flushed
        // so far must decode.
        let mut decoded = Vec::new();
        let _ = flate2::read::GzDecoder::new(sink.body.as_slice()).read_to_end(&mut decoded);
        assert_eq!(decoded, b"partial");
    }

    #[test]
    #[cfg(feature = "brotli")]
    fn test_brotli_round_trip() {
        let payload = "brotli data ".repeat(100);
        let mut sink = Collect::default();
        let mut encoder = Brotli.encoder(Level::Fastest).unwrap();
        encoder.write(payload.as_bytes(), &mut sink).unwrap();
        encoder.finish(&mut sink).unwrap();

        let mut decoded = Vec::new();
        brotli::BrotliDecompress(&mut sink.body.as_slice(), &mut decoded).unwrap();
        assert_eq!(decoded, payload.as_bytes());
    }

    #[test]
    #[cfg(feature = "bzip2")]
    fn test_bzip2_round_trip_with_flush() {
        use std::io::Read;

        let payload = "bzip2 data ".repeat(2000);
        let mut sink = Collect::default();
        let mut encoder = Bzip2.encoder(Level::Fastest).unwrap();
        for (i, chunk) in payload.as_bytes().chunks(4096).enumerate() {
            encoder.write(chunk, &mut sink).unwrap();
            if i == 0 {
                encoder.flush(&mut sink).unwrap();
            }
        }
        encoder.finish(&mut sink).unwrap();
        assert_eq!(sink.flushes, 1);

        // Bzip2 magic
        assert_eq!(&sink.body[..3], b"BZh");

        let mut decoded = String::new();
        bzip2::read::BzDecoder::new(sink.body.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    #[cfg(not(feature = "bzip2"))]
    fn test_unsupported_encoder() {
        assert!(matches!(
            Bzip2.encoder(Level::Fastest),
            Err(crate::Error::Unsupported(token)) if token == "bzip2"
        ));
    }
}
