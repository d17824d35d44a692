//! Error types for the formschema library.
//!
//! [`FormExtractError`] is the single fatal error of the pipeline: any batch
//! failure aborts the whole document, so there is no per-batch error type
//! that callers would need to collect. The one exception is [`ParseError`],
//! the parser stage's own result, which carries the raw model text for
//! diagnostics and is wrapped by [`FormExtractError::MalformedOutput`].
//!
//! Raw model text never appears in a `Display` message. It is logged by the
//! extractor and reachable through [`FormExtractError::raw_model_text`], so
//! an HTTP boundary can return `to_string()` or [`FormExtractError::user_message`]
//! without leaking model output.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the formschema library.
#[derive(Debug, Error)]
pub enum FormExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No page images were supplied.
    #[error("No page images supplied; at least one page is required")]
    EmptyInput,

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload exceeds the configured size limit.
    #[error("File '{name}' is {size} bytes, above the {limit}-byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// The file is neither a PDF nor a supported image.
    #[error("Unsupported file type for '{name}': {detail}")]
    UnsupportedFileType { name: String, detail: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// The page selection matched no page of the document.
    #[error("Page selection matched no pages (document has {total} pages)")]
    PageOutOfRange { total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// No model credential or provider is configured.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model declined to analyse a batch.
    #[error("Model refused to analyse pages {start_page}-{end_page}")]
    Refusal { start_page: usize, end_page: usize },

    /// The model returned no text content for a batch.
    #[error("Model returned an empty response for pages {start_page}-{end_page}")]
    EmptyResponse { start_page: usize, end_page: usize },

    /// The model's text could not be parsed as a form structure.
    #[error("Model output for pages {start_page}-{end_page} is unusable: {source}")]
    MalformedOutput {
        start_page: usize,
        end_page: usize,
        #[source]
        source: ParseError,
    },

    /// The provider rejected the call for rate-limit or quota reasons.
    #[error("Quota or rate limit exceeded for provider '{provider}': {detail}")]
    UpstreamQuota { provider: String, detail: String },

    /// The provider rejected the credentials (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    UpstreamAuth { provider: String, detail: String },

    /// The model call did not complete within the configured timeout.
    #[error("Model call timed out after {elapsed_ms}ms on pages starting at {start_page}")]
    ApiTimeout { start_page: usize, elapsed_ms: u64 },

    /// The provider itself reported a timeout, outside any batch context.
    #[error("{provider} timed out: {detail}")]
    ProviderTimeout { provider: String, detail: String },

    /// The provider returned any other error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dataset file line could not be decoded.
    #[error("Dataset '{path}' line {line} is corrupt: {detail}")]
    DatasetCorrupt {
        path: PathBuf,
        line: usize,
        detail: String,
    },

    /// No dataset record carries the requested id.
    #[error("Dataset record {id} not found")]
    DatasetRecordNotFound { id: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FormExtractError {
    /// Stable snake_case name of the error kind, for logs and JSON envelopes.
    pub fn kind(&self) -> &'static str {
        use FormExtractError::*;
        match self {
            EmptyInput => "empty_input",
            FileNotFound { .. } | PermissionDenied { .. } | InvalidInput { .. } => "bad_input",
            DownloadFailed { .. } | DownloadTimeout { .. } => "download",
            FileTooLarge { .. } => "file_too_large",
            UnsupportedFileType { .. } => "unsupported_file_type",
            CorruptPdf { .. }
            | PasswordRequired { .. }
            | WrongPassword { .. }
            | PageOutOfRange { .. }
            | RasterisationFailed { .. }
            | PdfiumBindingFailed(_) => "document",
            ProviderNotConfigured { .. } | InvalidConfig(_) => "configuration",
            Refusal { .. } => "refusal",
            EmptyResponse { .. } => "empty_response",
            MalformedOutput { .. } => "malformed_output",
            UpstreamQuota { .. } => "upstream_quota",
            UpstreamAuth { .. } => "upstream_auth",
            ApiTimeout { .. } | ProviderTimeout { .. } => "timeout",
            LlmApiError { .. } => "upstream",
            DatasetRecordNotFound { .. } => "bad_input",
            OutputWriteFailed { .. } | DatasetCorrupt { .. } | Internal(_) => "internal",
        }
    }

    /// HTTP status an API boundary should answer with.
    ///
    /// 400 for problems with what the caller sent, 413 for oversized
    /// uploads, 500 for everything upstream or internal.
    pub fn status_code(&self) -> u16 {
        use FormExtractError::*;
        match self {
            EmptyInput
            | FileNotFound { .. }
            | PermissionDenied { .. }
            | InvalidInput { .. }
            | UnsupportedFileType { .. }
            | CorruptPdf { .. }
            | PasswordRequired { .. }
            | WrongPassword { .. }
            | PageOutOfRange { .. }
            | DatasetRecordNotFound { .. } => 400,
            FileTooLarge { .. } => 413,
            _ => 500,
        }
    }

    /// Short human-readable message for an API response body.
    pub fn user_message(&self) -> String {
        use FormExtractError::*;
        match self {
            UpstreamQuota { .. } => {
                "The AI service quota has been exceeded. Please try again later.".to_string()
            }
            UpstreamAuth { .. } => {
                "The AI service rejected the configured API key.".to_string()
            }
            ProviderNotConfigured { .. } => "No AI model is configured on the server.".to_string(),
            Refusal { .. } => "The AI model declined to analyse this document.".to_string(),
            EmptyResponse { .. } | MalformedOutput { .. } => {
                "The AI model returned an unusable response. Please retry.".to_string()
            }
            ApiTimeout { .. } | ProviderTimeout { .. } => {
                "The AI model took too long to respond.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Raw model text behind a [`FormExtractError::MalformedOutput`], for logging.
    pub fn raw_model_text(&self) -> Option<&str> {
        match self {
            FormExtractError::MalformedOutput { source, .. } => Some(&source.raw_text),
            _ => None,
        }
    }
}

/// Strict JSON parsing of a model payload failed.
#[derive(Debug, Clone, Error)]
#[error("could not parse form structure: {detail}")]
pub struct ParseError {
    /// The full text the model produced.
    pub raw_text: String,
    /// The `serde_json` failure description.
    pub detail: String,
}
