use std::fmt;

/// Errors that terminate a command with a message for the user
#[derive(Debug)]
pub enum Error {
    /// Wrong invocation or a request the repository state cannot satisfy
    Usage(String),
    /// Metadata or blob storage contradicts itself
    Corruption(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Usage(msg) => write!(f, "{}", msg),
            Error::Corruption(msg) => write!(f, "Repository corrupted: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

/// Build a usage error wrapped for `anyhow` propagation
pub fn usage(msg: impl Into<String>) -> anyhow::Error {
    Error::Usage(msg.into()).into()
}

/// Build a corruption error wrapped for `anyhow` propagation
pub fn corruption(msg: impl Into<String>) -> anyhow::Error {
    Error::Corruption(msg.into()).into()
}
