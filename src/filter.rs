use crate::algorithm::Algorithm;
use crate::catalog::{AlgorithmConfig, Algorithms};
use crate::error::Result;
use crate::negotiate::negotiate;
use crate::output::Output;
use crate::sink::{CompressingSink, DEFAULT_THRESHOLD};
use http::{Request, header};
use std::sync::Arc;

/// Compresses responses according to the client's `Accept-Encoding`.
///
/// # Example
///
/// ```ignore
/// let filter = CompressionFilter::with_algorithms(["gzip", "br"])?.with_threshold(1024);
///
/// filter.handle(&request, output, |request, mut output| {
///     output.begin(StatusCode::OK, "OK", headers)?;
///     output.write(body)?;
///     output.close()
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct CompressionFilter {
    algorithms: Algorithms,
    threshold: usize,
}

impl CompressionFilter {
    /// Creates a filter offering Brotli, Gzip and Bzip2, in that order.
    pub fn new() -> Self {
        Self {
            algorithms: Algorithms::default(),
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Creates a filter offering the given algorithms, in preference order.
    ///
    /// Entries may be algorithm instances or the tokens `"br"`, `"gzip"` and
    /// `"bzip2"`; any other token is rejected.
    pub fn with_algorithms<I>(config: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<AlgorithmConfig>,
    {
        Ok(Self {
            algorithms: Algorithms::from_config(config)?,
            threshold: DEFAULT_THRESHOLD,
        })
    }

    /// Sets the number of bytes a response may reach and still be sent
    /// uncompressed.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Returns the configured algorithms.
    pub fn algorithms(&self) -> &Algorithms {
        &self.algorithms
    }

    /// Returns the configured threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Selects an algorithm for the given `Accept-Encoding` value.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<Arc<dyn Algorithm>> {
        let algorithm = negotiate(accept, &self.algorithms);
        tracing::debug!(
            accept,
            algorithm = algorithm.as_ref().map(|a| a.token()),
            "negotiated response compression"
        );
        algorithm
    }

    /// Runs `next` with an output that compresses when the request allows it.
    ///
    /// The result of `next` is returned unchanged.
    pub fn handle<'a, B, R, F>(
        &self,
        request: &Request<B>,
        output: Box<dyn Output + 'a>,
        next: F,
    ) -> R
    where
        F: FnOnce(&Request<B>, Box<dyn Output + 'a>) -> R,
    {
        let accept = request
            .headers()
            .get(header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok());

        let output: Box<dyn Output + 'a> = match self.negotiate(accept) {
            Some(algorithm) => Box::new(CompressingSink::new(output, algorithm, self.threshold)),
            None => output,
        };

        next(request, output)
    }
}

impl Default for CompressionFilter {
    fn default() -> Self {
        Self::new()
    }
}
