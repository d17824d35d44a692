//! Input resolution: read a local file or download a URL into memory.
//!
//! Both PDFs and images are loaded from bytes, so nothing is written to
//! disk. The size limit is enforced before the bytes are handed on, which is
//! where an HTTP boundary would answer 413.

use crate::config::ExtractionConfig;
use crate::error::FormExtractError;
use std::path::Path;
use tracing::{debug, info};

/// An uploaded or downloaded document held in memory.
#[derive(Clone, Debug)]
pub struct InputFile {
    /// File name used in logs, errors, and response metadata.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Fail with [`FormExtractError::FileTooLarge`] above `limit` bytes.
    pub fn check_size(&self, limit: u64) -> Result<(), FormExtractError> {
        if self.size() > limit {
            return Err(FormExtractError::FileTooLarge {
                name: self.name.clone(),
                size: self.size(),
                limit,
            });
        }
        Ok(())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a path or URL into an [`InputFile`] within the configured size limit.
pub async fn resolve_input(
    input: &str,
    config: &ExtractionConfig,
) -> Result<InputFile, FormExtractError> {
    if input.trim().is_empty() {
        return Err(FormExtractError::InvalidInput {
            input: input.to_string(),
        });
    }
    let file = if is_url(input) {
        download_url(input, config).await?
    } else {
        read_local(Path::new(input), config.max_file_bytes).await?
    };
    file.check_size(config.max_file_bytes)?;
    Ok(file)
}

/// Read a local file, rejecting it from its metadata before loading when it
/// exceeds `limit`.
async fn read_local(path: &Path, limit: u64) -> Result<InputFile, FormExtractError> {
    let io_err = |e: std::io::Error| match e.kind() {
        std::io::ErrorKind::PermissionDenied => FormExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => FormExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
    if metadata.len() > limit {
        return Err(FormExtractError::FileTooLarge {
            name,
            size: metadata.len(),
            limit,
        });
    }

    let bytes = tokio::fs::read(path).await.map_err(io_err)?;
    debug!("Read local input {} ({} bytes)", path.display(), bytes.len());
    Ok(InputFile { name, bytes })
}

async fn download_url(url: &str, config: &ExtractionConfig) -> Result<InputFile, FormExtractError> {
    info!("Downloading document from: {}", url);
    let timeout_secs = config.download_timeout_secs;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FormExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FormExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FormExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(FormExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let name = filename_from_url(url);
    if let Some(len) = response.content_length() {
        if len > config.max_file_bytes {
            return Err(FormExtractError::FileTooLarge {
                name,
                size: len,
                limit: config.max_file_bytes,
            });
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FormExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), name);
    Ok(InputFile {
        name,
        bytes: bytes.to_vec(),
    })
}

/// Last path segment of a URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/form.pdf"));
        assert!(is_url("http://example.com/form.pdf"));
        assert!(!is_url("/tmp/form.pdf"));
        assert!(!is_url("form.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(filename_from_url("https://x.org/a/b/kyc.pdf"), "kyc.pdf");
        assert_eq!(filename_from_url("https://x.org/a/b/"), "downloaded");
    }

    #[tokio::test]
    async fn reads_local_file_with_name() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.7 fake").unwrap();
        let config = ExtractionConfig::default();
        let file = resolve_input(tmp.path().to_str().unwrap(), &config)
            .await
            .unwrap();
        assert_eq!(file.bytes, b"%PDF-1.7 fake");
        assert!(!file.name.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = resolve_input("/definitely/not/here.pdf", &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FormExtractError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn oversized_file_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        let config = ExtractionConfig::builder().max_file_bytes(10).build().unwrap();
        let err = resolve_input(tmp.path().to_str().unwrap(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, FormExtractError::FileTooLarge { size: 64, limit: 10, .. }));
        assert_eq!(err.status_code(), 413);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_reading() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 64]).unwrap();
        let err = read_local(tmp.path(), 10).await.unwrap_err();
        assert!(matches!(err, FormExtractError::FileTooLarge { size: 64, limit: 10, .. }));

        let file = read_local(tmp.path(), 64).await.unwrap();
        assert_eq!(file.size(), 64);
    }
}
