use crate::filter::CompressionFilter;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies with the
/// algorithm negotiated from the client's `Accept-Encoding` header.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    filter: Arc<CompressionFilter>,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// Brotli, Gzip and Bzip2 are offered in that order, and responses of at
    /// most 500 bytes are sent uncompressed.
    pub fn new() -> Self {
        CompressionFilter::new().into()
    }

    /// Sets the number of bytes a response may reach and still be sent
    /// uncompressed.
    pub fn with_threshold(self, threshold: usize) -> Self {
        let filter = Arc::unwrap_or_clone(self.filter);
        filter.with_threshold(threshold).into()
    }

    /// Returns the filter deciding which responses are compressed.
    pub fn filter(&self) -> &CompressionFilter {
        &self.filter
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl From<CompressionFilter> for CompressionLayer {
    fn from(filter: CompressionFilter) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.filter.clone())
    }
}
