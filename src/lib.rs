//! Negotiated HTTP response compression.
//!
//! This crate compresses HTTP responses with Brotli, Gzip or Bzip2 depending
//! on the client's `Accept-Encoding` header. The decision to compress is
//! deferred: a response is buffered until it grows past a threshold
//! (500 bytes by default) or the handler flushes. Responses that complete
//! before that are sent uncompressed with an exact `Content-Length`; larger
//! ones are streamed through the encoder without a length.
//!
//! Two surfaces share the same machinery:
//!
//! - [`CompressionFilter`] wraps an [`Output`], the push-style response sink
//!   a handler writes its head and body into.
//! - [`CompressionLayer`] is a Tower layer for `http` services.
//!
//! # Example
//!
//! ```ignore
//! use http_compress_responses::{CompressionFilter, CompressionLayer};
//! use tower::ServiceBuilder;
//!
//! let filter = CompressionFilter::with_algorithms(["gzip", "br"])?.with_threshold(1024);
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::from(filter))
//!     .service(my_service);
//! ```
//!
//! # Negotiation
//!
//! `Accept-Encoding` entries are tried from highest to lowest quality, ties in
//! header order. Entries with `q=0` are skipped, and `*` picks the first
//! supported algorithm in server preference order.
//!
//! # Compression Rules
//!
//! The Tower layer will **not** compress responses when:
//! - No supported `Accept-Encoding` is present in the request
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - `Content-Type` starts with `image/` (except `image/svg+xml`)
//! - `Content-Type` starts with `application/grpc` (except `application/grpc-web`)
//! - `Content-Length` is at most the threshold, or the body is empty
//!
//! The layer will **always flush** after each chunk when:
//! - `X-Accel-Buffering: no` header is present
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `application/grpc-web`
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to the algorithm's token
//! - `Content-Length` header is removed
//! - `Accept-Ranges` header is removed (Tower layer only)
//! - `Vary` header includes `Accept-Encoding`

#![deny(missing_docs)]

mod algorithm;
mod body;
mod catalog;
mod error;
mod filter;
mod future;
mod layer;
mod negotiate;
mod output;
mod service;
mod sink;
#[cfg(test)]
mod testing;

pub use algorithm::{Algorithm, Brotli, Bzip2, Encoder, Gzip};
pub use body::CompressionBody;
pub use catalog::{AlgorithmConfig, Algorithms};
pub use compression_core::Level;
pub use error::{Error, Result};
pub use filter::CompressionFilter;
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use negotiate::negotiate;
pub use output::{Head, Output, WireOutput};
pub use service::CompressionService;
pub use sink::{CompressingSink, DEFAULT_THRESHOLD, State};
