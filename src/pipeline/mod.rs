//! Pipeline stages for form-structure extraction.
//!
//! Each submodule implements exactly one transformation step, and all but
//! [`llm`] and the image-source stages are pure functions.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ batch ──▶ llm ──▶ parse ──▶ normalize ──▶ merge
//! (path/URL) (pages)   (groups)  (VLM)   (JSON)    (vocabulary)  (global ids)
//! ```
//!
//! 1. [`input`]     — read a local file or download a URL, enforcing the size limit
//! 2. [`render`]    — sniff the type; rasterise PDFs, pass images through
//! 3. [`encode`]    — PNG-encode rendered pages, base64-wrap page bytes for the API
//! 4. [`batch`]     — split pages into fixed-size contiguous groups
//! 5. [`llm`]       — one model call per group; the only stage with network I/O
//! 6. [`parse`]     — refusal detection, payload extraction, strict JSON parse
//! 7. [`normalize`] — closed component vocabulary and structural defaults
//! 8. [`merge`]     — fold batch structures into one with unique ids

pub mod batch;
pub mod encode;
pub mod input;
pub mod llm;
pub mod merge;
pub mod normalize;
pub mod parse;
pub mod render;
