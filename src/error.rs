use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("request to {url} failed: {message}")]
    Network {
        url: String,
        message: String,
        transient: bool,
    },

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to parse feed: {0}")]
    Parse(String),

    #[error("vault operation on {path} failed: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

impl SyncError {
    pub fn network(url: &str, err: reqwest::Error) -> Self {
        let transient = err.is_timeout() || err.is_connect() || err.is_request();
        SyncError::Network {
            url: url.to_string(),
            message: err.to_string(),
            transient,
        }
    }

    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Storage {
            path: path.into(),
            source,
        }
    }

    /// Rate limits, server errors and dropped connections are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network { transient, .. } => *transient,
            SyncError::Status { status, .. } => *status == 429 || *status >= 500,
            SyncError::Parse(_) | SyncError::Storage { .. } => false,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network { .. } | SyncError::Status { .. })
    }
}

impl From<quick_xml::Error> for SyncError {
    fn from(err: quick_xml::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transience() {
        let rate = SyncError::Status { url: "u".into(), status: 429 };
        let down = SyncError::Status { url: "u".into(), status: 503 };
        let gone = SyncError::Status { url: "u".into(), status: 404 };
        assert!(rate.is_transient());
        assert!(down.is_transient());
        assert!(!gone.is_transient());
        assert!(gone.is_network());
    }

    #[test]
    fn parse_and_storage_never_retry() {
        assert!(!SyncError::Parse("eof".into()).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = SyncError::storage("root/watch.md", io);
        assert!(!err.is_transient());
        assert!(!err.is_network());
        assert!(err.to_string().contains("root/watch.md"));
    }
}
