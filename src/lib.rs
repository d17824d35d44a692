//! # formschema
//!
//! Extract the fillable structure of a form document (its sections, fields,
//! and field types) using Vision Language Models (VLMs).
//!
//! Each page is rasterised to an image and shown to a VLM with a fixed
//! extraction contract. Long documents are split into page batches, each
//! batch becomes one model call, and the batch answers are merged into one
//! [`FormStructure`] with globally unique, sequential ids.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise PDF pages via pdfium (spawn_blocking)
//!  ├─ 3. Batch      contiguous groups of ≤ pages_per_batch pages
//!  ├─ 4. VLM        one call per batch, bounded concurrency
//!  ├─ 5. Parse      refusal check, JSON payload, vocabulary normalisation
//!  └─ 6. Merge      one FormStructure, sections renumbered in batch order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use formschema::{extract_document, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract_document("application.pdf", &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.structure)?);
//!     eprintln!("{} pages in {} batches", output.meta.pages_processed, output.meta.batches);
//!     Ok(())
//! }
//! ```
//!
//! Already have page images? Call [`extract_form_structure`] directly.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `form2schema` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! formschema = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use dataset::{DatasetImage, DatasetRecord, DatasetStore};
pub use error::{FormExtractError, ParseError};
pub use extract::{
    extract_document, extract_form_structure, extract_from_bytes, extract_sync, extract_to_file,
    resolve_model,
};
pub use output::{ExtractionMeta, ExtractionOutput, ExtractionResponse};
pub use pipeline::llm::{ModelReply, ModelRequest, ProviderModel, VisionModel};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{ComponentKind, Field, FormStructure, PageImage, Section, UNTITLED_FORM};
