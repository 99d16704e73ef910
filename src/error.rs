use std::path::PathBuf;
use thiserror::Error;

/// Navigation failures raised by a page fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("navigation timed out after {secs}s: {url}")]
    Timeout { url: String, secs: u64 },

    #[error("connection failed for {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("proxy {proxy} rejected credentials")]
    ProxyAuth { proxy: String },

    #[error("proxy {proxy} failed: {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("failed to read page body for {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("could not open session: {0}")]
    Session(String),

    #[error("gave up on {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::Connection { .. }
            | FetchError::Proxy { .. }
            | FetchError::ProxyAuth { .. }
            | FetchError::Body { .. }
            | FetchError::Session(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Exhausted { .. } => false,
        }
    }

    pub fn is_proxy_failure(&self) -> bool {
        matches!(self, FetchError::Proxy { .. } | FetchError::ProxyAuth { .. })
    }
}

/// Whole-page extraction failures. Missing fields are not errors.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no table or card structure found")]
    NoStructure,

    #[error("invalid selector {0}")]
    Selector(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("header mismatch in {path:?}: expected {expected}, found {found}")]
    SchemaMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("merge output {path:?} is also one of its inputs")]
    OutputIsInput { path: PathBuf },

    #[error("nothing to merge")]
    EmptyMerge,
}

impl WriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WriteError::Io { path: path.into(), source }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        WriteError::Csv { path: path.into(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.test".to_string();
        assert!(FetchError::Timeout { url: url.clone(), secs: 30 }.is_retryable());
        assert!(FetchError::Status { url: url.clone(), status: 503 }.is_retryable());
        assert!(FetchError::Status { url: url.clone(), status: 429 }.is_retryable());
        assert!(!FetchError::Status { url: url.clone(), status: 404 }.is_retryable());

        let exhausted = FetchError::Exhausted {
            url,
            attempts: 3,
            last: Box::new(FetchError::Session("x".into())),
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn test_proxy_failure_classification() {
        assert!(FetchError::ProxyAuth { proxy: "p".into() }.is_proxy_failure());
        assert!(!FetchError::Session("boom".into()).is_proxy_failure());
    }
}
