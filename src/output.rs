use crate::error::{Error, Result};
use http::{HeaderMap, StatusCode, header};
use std::io::Write;

/// A response body sink.
///
/// The response head is handed over once through [`begin`](Output::begin),
/// followed by any number of writes and flushes, and finally a single
/// [`close`](Output::close). Framing (exact length or chunked) is the sink's
/// business and follows from the presence of a `Content-Length` header.
pub trait Output {
    /// Starts the response with the given status line and headers.
    fn begin(&mut self, status: StatusCode, reason: &str, headers: HeaderMap) -> Result<()>;

    /// Writes a chunk of body data.
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Pushes everything written so far towards the client.
    fn flush(&mut self) -> Result<()>;

    /// Completes the response.
    fn close(&mut self) -> Result<()>;
}

impl<O: Output + ?Sized> Output for Box<O> {
    fn begin(&mut self, status: StatusCode, reason: &str, headers: HeaderMap) -> Result<()> {
        (**self).begin(status, reason, headers)
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        (**self).write(chunk)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<O: Output + ?Sized> Output for &mut O {
    fn begin(&mut self, status: StatusCode, reason: &str, headers: HeaderMap) -> Result<()> {
        (**self).begin(status, reason, headers)
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        (**self).write(chunk)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Captured status line and headers of a response that has not been sent yet.
#[derive(Debug, Clone)]
pub struct Head {
    /// Response status.
    pub status: StatusCode,
    /// Reason phrase sent after the status code.
    pub reason: String,
    /// Response headers.
    pub headers: HeaderMap,
}

impl Head {
    /// Creates a head from its parts.
    pub fn new(status: StatusCode, reason: &str, headers: HeaderMap) -> Self {
        Self {
            status,
            reason: reason.to_owned(),
            headers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Pending,
    Length,
    Chunked,
    Closed,
}

/// An [`Output`] serializing an HTTP/1.1 response onto a writer.
///
/// Responses without a `Content-Length` header are sent with
/// `Transfer-Encoding: chunked`.
#[derive(Debug)]
pub struct WireOutput<W> {
    writer: W,
    framing: Framing,
}

impl<W: Write> WireOutput<W> {
    /// Creates a wire output writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            framing: Framing::Pending,
        }
    }

    /// Returns a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Consumes this output, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Output for WireOutput<W> {
    fn begin(&mut self, status: StatusCode, reason: &str, mut headers: HeaderMap) -> Result<()> {
        if self.framing != Framing::Pending {
            return Err(Error::Protocol("response already begun"));
        }

        self.framing = if headers.contains_key(header::CONTENT_LENGTH) {
            Framing::Length
        } else {
            headers.insert(
                header::TRANSFER_ENCODING,
                header::HeaderValue::from_static("chunked"),
            );
            Framing::Chunked
        };

        write!(self.writer, "HTTP/1.1 {} {}\r\n", status.as_str(), reason)?;
        for (name, value) in headers.iter() {
            self.writer.write_all(name.as_str().as_bytes())?;
            self.writer.write_all(b": ")?;
            self.writer.write_all(value.as_bytes())?;
            self.writer.write_all(b"\r\n")?;
        }
        self.writer.write_all(b"\r\n")?;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        match self.framing {
            Framing::Pending => Err(Error::Protocol("write before response begun")),
            Framing::Closed => Err(Error::Protocol("write after response closed")),
            Framing::Length => Ok(self.writer.write_all(chunk)?),
            // A zero-length chunk would terminate the body
            Framing::Chunked if chunk.is_empty() => Ok(()),
            Framing::Chunked => {
                write!(self.writer, "{:x}\r\n", chunk.len())?;
                self.writer.write_all(chunk)?;
                self.writer.write_all(b"\r\n")?;
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.framing == Framing::Closed {
            return Err(Error::Protocol("flush after response closed"));
        }
        Ok(self.writer.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        match self.framing {
            Framing::Pending => return Err(Error::Protocol("close before response begun")),
            Framing::Closed => return Err(Error::Protocol("response already closed")),
            Framing::Chunked => self.writer.write_all(b"0\r\n\r\n")?,
            Framing::Length => {}
        }
        self.framing = Framing::Closed;
        Ok(self.writer.flush()?)
    }
}
