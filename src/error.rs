use std::io;

/// Errors produced while configuring the filter or writing a response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An algorithm token in the configuration has no built-in implementation.
    #[error("unknown algorithm \"{0}\"")]
    InvalidConfiguration(String),

    /// The algorithm's codec was not compiled into this build.
    #[error("compression algorithm \"{0}\" is not supported by this build")]
    Unsupported(String),

    /// An output was driven out of order, e.g. written to after it was closed.
    #[error("output protocol violation: {0}")]
    Protocol(&'static str),

    /// The underlying sink or codec failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(error) => error,
            other => io::Error::other(other),
        }
    }
}
