//! Result types returned by the document-level entry points.

use crate::error::FormExtractError;
use crate::schema::{FormStructure, PageImage};
use serde::{Deserialize, Serialize};

/// A finished extraction: the merged structure plus run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionOutput {
    pub structure: FormStructure,
    pub meta: ExtractionMeta,
    /// The rendered pages the model was shown. Not serialised.
    #[serde(skip)]
    pub pages: Vec<PageImage>,
}

/// Facts about one extraction run, as reported to API callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMeta {
    pub original_filename: String,
    pub file_size: u64,
    pub pages_processed: usize,
    pub processing_time_ms: u64,
    pub batches: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Token and timing totals of the batch stage alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: usize,
    pub pages: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The `{ success, data, meta }` / `{ success: false, error }` envelope an
/// HTTP boundary answers with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FormStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExtractionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResponse {
    /// Build the envelope and the HTTP status to send it with.
    ///
    /// Failures carry only [`FormExtractError::user_message`]; raw model text
    /// is never part of a response.
    pub fn from_result(result: &Result<ExtractionOutput, FormExtractError>) -> (u16, Self) {
        match result {
            Ok(output) => (
                200,
                Self {
                    success: true,
                    data: Some(output.structure.clone()),
                    meta: Some(output.meta.clone()),
                    error: None,
                },
            ),
            Err(e) => (
                e.status_code(),
                Self {
                    success: false,
                    data: None,
                    meta: None,
                    error: Some(e.user_message()),
                },
            ),
        }
    }
}
