use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the NetGuard gateway and its control surface.
#[derive(Debug, Error)]
pub enum NetguardError {
    /// The listener could not bind its address (port in use, permission denied).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The served page could not be read.
    #[error("cannot read page content at {}: {source}", path.display())]
    ContentRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for NetguardError {
    fn from(e: serde_json::Error) -> Self {
        NetguardError::InvalidCommand(e.to_string())
    }
}

pub type NetguardResult<T> = Result<T, NetguardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_bind_error_carries_cause() {
        let err = NetguardError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            source: Error::new(ErrorKind::AddrInUse, "address in use"),
        };
        let text = err.to_string();
        assert!(text.contains("0.0.0.0:8080"));
        assert!(text.contains("address in use"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_content_read_mentions_path() {
        let err = NetguardError::ContentRead {
            path: PathBuf::from("/srv/server_index.html"),
            source: Error::new(ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read page content at /srv/server_index.html: no such file"
        );
    }

    #[test]
    fn test_json_error_becomes_invalid_command() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: NetguardError = parse.into();
        assert!(matches!(err, NetguardError::InvalidCommand(_)));
    }
}
