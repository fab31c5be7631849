//! Page content provider: the HTML served to allowed peers.

use netguard_core::{NetguardError, NetguardResult};
use std::path::PathBuf;

/// Where the served page comes from.
#[derive(Debug, Clone)]
pub enum PageSource {
    /// Read from disk on every request so edits show up without a restart.
    File(PathBuf),
    /// Fixed content held in memory.
    Inline(String),
}

impl PageSource {
    pub async fn load(&self) -> NetguardResult<String> {
        match self {
            PageSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| NetguardError::ContentRead {
                    path: path.clone(),
                    source,
                }),
            PageSource::Inline(content) => Ok(content.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_is_reread() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<h1>one</h1>").unwrap();
        let page = PageSource::File(file.path().to_path_buf());
        assert_eq!(page.load().await.unwrap(), "<h1>one</h1>");

        std::fs::write(file.path(), "<h1>two</h1>").unwrap();
        assert_eq!(page.load().await.unwrap(), "<h1>two</h1>");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let page = PageSource::File(dir.path().join("server_index.html"));
        let err = page.load().await.unwrap_err();
        assert!(matches!(err, NetguardError::ContentRead { .. }));
        assert!(err.to_string().contains("server_index.html"));
    }

    #[tokio::test]
    async fn test_inline() {
        let page = PageSource::Inline("hello".to_string());
        assert_eq!(page.load().await.unwrap(), "hello");
    }
}
