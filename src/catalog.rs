use crate::algorithm::{Algorithm, Brotli, Bzip2, Gzip};
use crate::error::{Error, Result};
use std::sync::Arc;

/// An algorithm configuration entry: either an instance or a built-in token.
#[derive(Debug, Clone)]
pub enum AlgorithmConfig {
    /// An algorithm implementation.
    Instance(Arc<dyn Algorithm>),
    /// One of the built-in tokens: `"br"`, `"gzip"` or `"bzip2"`.
    Token(String),
}

impl AlgorithmConfig {
    /// Wraps an algorithm implementation.
    pub fn instance<A: Algorithm>(algorithm: A) -> Self {
        Self::Instance(Arc::new(algorithm))
    }

    fn resolve(self) -> Result<Arc<dyn Algorithm>> {
        match self {
            Self::Instance(algorithm) => Ok(algorithm),
            Self::Token(token) => match token.as_str() {
                "br" => Ok(Arc::new(Brotli)),
                "gzip" => Ok(Arc::new(Gzip)),
                "bzip2" => Ok(Arc::new(Bzip2)),
                _ => Err(Error::InvalidConfiguration(token)),
            },
        }
    }
}

impl From<Arc<dyn Algorithm>> for AlgorithmConfig {
    fn from(algorithm: Arc<dyn Algorithm>) -> Self {
        Self::Instance(algorithm)
    }
}

impl From<&str> for AlgorithmConfig {
    fn from(token: &str) -> Self {
        Self::Token(token.to_owned())
    }
}

impl From<String> for AlgorithmConfig {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

/// An ordered set of compression algorithms, unique by token.
///
/// Iteration order is the server's preference order.
#[derive(Debug, Clone)]
pub struct Algorithms {
    entries: Vec<Arc<dyn Algorithm>>,
}

impl Algorithms {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a set from configuration entries, resolving tokens to the
    /// built-in algorithms.
    ///
    /// Fails on the first unknown token.
    pub fn from_config<I>(config: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<AlgorithmConfig>,
    {
        let mut algorithms = Self::new();
        for entry in config {
            let entry: AlgorithmConfig = entry.into();
            algorithms.add([entry.resolve()?]);
        }
        Ok(algorithms)
    }

    /// Adds algorithms whose token is not yet present; the first registration
    /// of a token wins.
    pub fn add<I>(&mut self, algorithms: I) -> &mut Self
    where
        I: IntoIterator<Item = Arc<dyn Algorithm>>,
    {
        for algorithm in algorithms {
            if self.find(algorithm.token()).is_none() {
                self.entries.push(algorithm);
            }
        }
        self
    }

    /// Looks up an algorithm by its exact token.
    pub fn find(&self, token: &str) -> Option<&Arc<dyn Algorithm>> {
        self.entries.iter().find(|a| a.token() == token)
    }

    /// Iterates in preference order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<dyn Algorithm>> {
        self.entries.iter()
    }

    /// Iterates over the algorithms usable in this build, in preference order.
    pub fn supported(&self) -> impl Iterator<Item = &Arc<dyn Algorithm>> {
        self.entries.iter().filter(|a| a.supported())
    }

    /// Number of algorithms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Algorithms {
    /// Brotli, Gzip and Bzip2, in that order.
    fn default() -> Self {
        let mut algorithms = Self::new();
        algorithms.add([
            Arc::new(Brotli) as Arc<dyn Algorithm>,
            Arc::new(Gzip),
            Arc::new(Bzip2),
        ]);
        algorithms
    }
}

impl<'a> IntoIterator for &'a Algorithms {
    type Item = &'a Arc<dyn Algorithm>;
    type IntoIter = std::slice::Iter<'a, Arc<dyn Algorithm>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
