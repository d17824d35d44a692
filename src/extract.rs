//! Extraction entry points.
//!
//! [`extract_form_structure`] is the core: ordered page images in, one merged
//! [`FormStructure`] out. The `extract_document*` functions wrap it with the
//! image source (path, URL, or in-memory bytes) and report run metadata.
//!
//! Batches are merged in batch order no matter how many are in flight, and
//! the first failing batch aborts the job: no partial structure is returned.

use crate::config::{ExtractionConfig, DEFAULT_MODEL};
use crate::error::FormExtractError;
use crate::output::{BatchStats, ExtractionMeta, ExtractionOutput};
use crate::pipeline::batch::plan_batches;
use crate::pipeline::input::{self, InputFile};
use crate::pipeline::llm::{extract_batch, BatchResult, ProviderModel, VisionModel};
use crate::pipeline::merge::merge_batches;
use crate::pipeline::render;
use crate::schema::{FormStructure, PageImage};
use edgequake_llm::ProviderFactory;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Extract one document's form structure from its ordered page images.
///
/// # Errors
/// - [`FormExtractError::EmptyInput`] when `images` is empty, before anything else
/// - [`FormExtractError::ProviderNotConfigured`] when no model can be resolved
/// - any batch failure (refusal, empty or malformed output, upstream errors)
pub async fn extract_form_structure(
    images: &[PageImage],
    config: &ExtractionConfig,
) -> Result<FormStructure, FormExtractError> {
    if images.is_empty() {
        return Err(FormExtractError::EmptyInput);
    }
    let model = resolve_model(config)?;
    let (structure, _) = run_batches(model.as_ref(), images, config).await?;
    Ok(structure)
}

/// Extract a form from a local file path or HTTP/HTTPS URL.
pub async fn extract_document(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, FormExtractError> {
    let start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let file = input::resolve_input(input_str, config).await?;
    extract_input_file(file, config, start).await
}

/// Extract a form from document bytes already in memory (an upload).
///
/// # Example
/// ```rust,no_run
/// use formschema::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("application.pdf")?;
/// let output = extract_from_bytes(bytes, "application.pdf", &ExtractionConfig::default()).await?;
/// println!("{}", serde_json::to_string_pretty(&output.structure)?);
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: impl Into<Vec<u8>>,
    filename: impl Into<String>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, FormExtractError> {
    let start = Instant::now();
    let file = InputFile::new(filename, bytes);
    file.check_size(config.max_file_bytes)?;
    extract_input_file(file, config, start).await
}

/// Extract a form and write its structure as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, FormExtractError> {
    let output = extract_document(input_str, config).await?;
    let path = output_path.as_ref();
    let write_err = |source| FormExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(&output.structure)
        .map_err(|e| FormExtractError::Internal(format!("serialise structure: {e}")))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output)
}

/// Synchronous wrapper around [`extract_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, FormExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FormExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_document(input_str, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn extract_input_file(
    file: InputFile,
    config: &ExtractionConfig,
    start: Instant,
) -> Result<ExtractionOutput, FormExtractError> {
    // Resolve the model before rendering so a missing credential fails fast.
    let model = resolve_model(config)?;
    let images = render::load_page_images(&file, config).await?;
    let (structure, stats) = run_batches(model.as_ref(), &images, config).await?;

    let meta = ExtractionMeta {
        original_filename: file.name.clone(),
        file_size: file.size(),
        pages_processed: stats.pages,
        processing_time_ms: start.elapsed().as_millis() as u64,
        batches: stats.batches,
        input_tokens: stats.input_tokens,
        output_tokens: stats.output_tokens,
    };
    info!(
        "Extracted '{}': {} sections, {} fields from {} pages in {}ms",
        meta.original_filename,
        structure.sections.len(),
        structure.field_count(),
        meta.pages_processed,
        meta.processing_time_ms
    );
    Ok(ExtractionOutput {
        structure,
        meta,
        pages: images,
    })
}

/// Plan batches, run them with at most `config.concurrency` in flight, and
/// merge the answers in batch order.
async fn run_batches(
    model: &dyn VisionModel,
    images: &[PageImage],
    config: &ExtractionConfig,
) -> Result<(FormStructure, BatchStats), FormExtractError> {
    if images.is_empty() {
        return Err(FormExtractError::EmptyInput);
    }
    let batches = plan_batches(images, config.pages_per_batch);
    let total_batches = batches.len();
    let total_pages = images.len();
    debug!(
        "{} pages → {} batches of ≤{}",
        total_pages, total_batches, config.pages_per_batch
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(total_pages, total_batches);
    }

    // `buffered` yields in input order, so completions that arrive early wait
    // for their predecessors; the first error drops every in-flight call.
    let results: Vec<BatchResult> = stream::iter(batches.into_iter().map(|batch| async move {
        let n = batch.index + 1;
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_start(n, total_batches, batch.start_page, batch.page_count);
        }
        let result = extract_batch(model, &batch, total_pages, config).await;
        if let Some(ref cb) = config.progress_callback {
            match &result {
                Ok(r) => cb.on_batch_complete(n, total_batches, r.structure.sections.len()),
                Err(e) => cb.on_batch_error(n, total_batches, &e.to_string()),
            }
        }
        result
    }))
    .buffered(config.concurrency.max(1))
    .try_collect()
    .await?;

    let stats = BatchStats {
        batches: total_batches,
        pages: total_pages,
        input_tokens: results.iter().map(|r| r.input_tokens as u64).sum(),
        output_tokens: results.iter().map(|r| r.output_tokens as u64).sum(),
    };
    let structure = merge_batches(results.into_iter().map(|r| r.structure).collect());

    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_complete(total_batches, structure.sections.len());
    }
    Ok((structure, stats))
}

/// Resolve the model, from most-specific to least-specific:
///
/// 1. `config.vision_model`: used as-is (tests, custom middleware)
/// 2. `config.provider`: a pre-built `edgequake_llm` provider
/// 3. `config.provider_name` (+ `config.model`)
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 5. `OPENAI_API_KEY`, then `ProviderFactory::from_env`
pub fn resolve_model(config: &ExtractionConfig) -> Result<Arc<dyn VisionModel>, FormExtractError> {
    if let Some(ref model) = config.vision_model {
        return Ok(Arc::clone(model));
    }

    if let Some(ref provider) = config.provider {
        let name = config.provider_name.as_deref().unwrap_or("custom");
        return Ok(Arc::new(ProviderModel::new(Arc::clone(provider), name)));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_model(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_model(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_model("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| FormExtractError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or GEMINI_API_KEY.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(Arc::new(ProviderModel::new(llm_provider, "auto")))
}

fn create_vision_model(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn VisionModel>, FormExtractError> {
    let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        FormExtractError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })?;
    Ok(Arc::new(ProviderModel::new(provider, provider_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::{ModelReply, ModelRequest};
    use crate::progress::ExtractionProgressCallback;
    use crate::schema::ComponentKind;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers by matching a marker in the instruction; records every call.
    struct ScriptedModel {
        script: Vec<(&'static str, &'static str, u64)>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(script: Vec<(&'static str, &'static str, u64)>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, FormExtractError> {
            self.calls.lock().unwrap().push(request.instruction.clone());
            let (_, reply, delay_ms) = self
                .script
                .iter()
                .find(|(marker, _, _)| request.instruction.contains(marker))
                .copied()
                .unwrap_or(("", "", 0));
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            Ok(ModelReply {
                content: reply.to_string(),
                input_tokens: 50,
                output_tokens: 10,
            })
        }
    }

    fn pages(n: usize) -> Vec<PageImage> {
        (1..=n)
            .map(|p| PageImage::new(p, vec![p as u8; 8], "image/png"))
            .collect()
    }

    fn config_with(model: Arc<ScriptedModel>, per_batch: usize, concurrency: usize) -> ExtractionConfig {
        ExtractionConfig::builder()
            .vision_model(model)
            .pages_per_batch(per_batch)
            .concurrency(concurrency)
            .build()
            .unwrap()
    }

    const BATCH_1: &str = r#"{"formTitle":"Loan Application","sections":[
        {"id":"section_1","title":"Applicant","order":1,"fields":[
            {"id":"field_1_1","label":"Name","component":"Short Input","order":1},
            {"id":"field_1_2","label":"Email","component":"email","order":2}]},
        {"id":"section_2","title":"Address","order":2,"fields":[
            {"id":"field_2_1","label":"Street","component":"Short Input","order":1}]}]}"#;
    const BATCH_2: &str = r#"```json
{"formTitle":"Loan Application (cont.)","sections":[
    {"id":"section_1","title":"Employment","order":1,"fields":[
        {"id":"field_1_1","label":"Employer","component":"Short Input","order":1},
        {"id":"field_1_2","label":"Status","component":"radio","options":["Full-time","Part-time"],"order":2}]}]}
```"#;
    const BATCH_3: &str = r#"{"formTitle":"Other","sections":[
        {"id":"section_1","title":"Declaration","order":1,"fields":[
            {"id":"field_1_1","label":"I agree","component":"checkbox","required":"yes","order":1},
            {"id":"field_1_2","label":"Signature","component":"Signature","order":2}]}]}"#;

    #[tokio::test]
    async fn small_document_makes_exactly_one_call() {
        let model = ScriptedModel::new(vec![("form pages", BATCH_1, 0)]);
        let config = config_with(model.clone(), 5, 1);
        let structure = extract_form_structure(&pages(4), &config).await.unwrap();
        assert_eq!(model.call_count(), 1);
        assert_eq!(structure.form_title, "Loan Application");
        assert_eq!(structure.sections.len(), 2);
    }

    #[tokio::test]
    async fn three_batches_merge_into_one_structure() {
        let model = ScriptedModel::new(vec![
            ("pages 1-5 ", BATCH_1, 0),
            ("pages 6-10 ", BATCH_2, 0),
            ("pages 11-12 ", BATCH_3, 0),
        ]);
        let config = config_with(model.clone(), 5, 1);
        let structure = extract_form_structure(&pages(12), &config).await.unwrap();

        assert_eq!(model.call_count(), 3);
        assert_eq!(structure.form_title, "Loan Application");
        let titles: Vec<_> = structure.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Applicant", "Address", "Employment", "Declaration"]);
        let ids: Vec<_> = structure.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["section_1", "section_2", "section_3", "section_4"]);
        let orders: Vec<_> = structure.sections.iter().map(|s| s.order).collect();
        assert_eq!(orders, [1, 2, 3, 4]);

        let employment = &structure.sections[2];
        assert_eq!(employment.fields[0].id, "field_3_1");
        assert_eq!(employment.fields[1].id, "field_3_2");
        assert_eq!(employment.fields[1].component, ComponentKind::RadioSelect);

        let declaration = &structure.sections[3];
        assert_eq!(declaration.fields[0].id, "field_4_1");
        assert_eq!(declaration.fields[0].component, ComponentKind::MultiSelect);
        assert!(declaration.fields[0].required);
        assert_eq!(declaration.fields[1].component, ComponentKind::Signature);
    }

    #[tokio::test]
    async fn empty_input_fails_before_model_resolution() {
        // No model configured: EmptyInput must win over ProviderNotConfigured.
        let err = extract_form_structure(&[], &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FormExtractError::EmptyInput));

        let model = ScriptedModel::new(vec![]);
        let config = config_with(model.clone(), 5, 1);
        assert!(extract_form_structure(&[], &config).await.is_err());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn failing_batch_aborts_the_job() {
        let model = ScriptedModel::new(vec![
            ("pages 1-2 ", BATCH_1, 0),
            ("pages 3-4 ", "I'm sorry, I can't help with that.", 0),
            ("pages 5-5 ", BATCH_3, 0),
        ]);
        let config = config_with(model.clone(), 2, 1);
        let err = extract_form_structure(&pages(5), &config).await.unwrap_err();
        assert!(matches!(err, FormExtractError::Refusal { start_page: 3, end_page: 4 }));
        // Sequential runs stop at the failure.
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_batches_merge_in_batch_order() {
        // The first batch finishes last.
        let model = ScriptedModel::new(vec![
            ("pages 1-5 ", BATCH_1, 300),
            ("pages 6-10 ", BATCH_2, 100),
            ("pages 11-12 ", BATCH_3, 10),
        ]);
        let config = config_with(model.clone(), 5, 3);
        let structure = extract_form_structure(&pages(12), &config).await.unwrap();
        let titles: Vec<_> = structure.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["Applicant", "Address", "Employment", "Declaration"]);
        assert_eq!(structure.form_title, "Loan Application");
    }

    #[derive(Default)]
    struct Recorder {
        started: AtomicUsize,
        completed: AtomicUsize,
        failed: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ExtractionProgressCallback for Recorder {
        fn on_batch_start(&self, _: usize, _: usize, _: usize, _: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_complete(&self, _: usize, _: usize, _: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_batch_error(&self, _: usize, _: usize, _: &str) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_extraction_complete(&self, _: usize, _: usize) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_events_follow_batches() {
        let model = ScriptedModel::new(vec![
            ("pages 1-5 ", BATCH_1, 0),
            ("pages 6-7 ", "not json at all", 0),
        ]);
        let recorder = Arc::new(Recorder::default());
        let config = ExtractionConfig::builder()
            .vision_model(model)
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let err = extract_form_structure(&pages(7), &config).await.unwrap_err();
        assert!(matches!(err, FormExtractError::MalformedOutput { start_page: 6, .. }));
        assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_upload_reports_meta() {
        let model = ScriptedModel::new(vec![("form page", BATCH_3, 0)]);
        let config = config_with(model.clone(), 5, 1);
        let png = b"\x89PNG\r\n\x1a\n0000".to_vec();
        let output = extract_from_bytes(png, "consent.png", &config).await.unwrap();

        assert_eq!(output.meta.original_filename, "consent.png");
        assert_eq!(output.meta.file_size, 12);
        assert_eq!(output.meta.pages_processed, 1);
        assert_eq!(output.meta.batches, 1);
        assert_eq!(output.meta.input_tokens, 50);
        assert_eq!(output.structure.sections[0].title, "Declaration");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_without_calls() {
        let model = ScriptedModel::new(vec![]);
        let config = ExtractionConfig::builder()
            .vision_model(model.clone())
            .max_file_bytes(4)
            .build()
            .unwrap();
        let err = extract_from_bytes(b"\x89PNG\r\n\x1a\n".to_vec(), "big.png", &config)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 413);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn writes_structure_file() {
        let mut input = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        input.write_all(b"\x89PNG\r\n\x1a\n0000").unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("nested").join("form.json");

        let model = ScriptedModel::new(vec![("form page", BATCH_1, 0)]);
        let config = config_with(model, 5, 1);
        extract_to_file(input.path().to_str().unwrap(), &out_path, &config)
            .await
            .unwrap();

        let written: FormStructure =
            serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
        assert_eq!(written.form_title, "Loan Application");
        assert!(!out_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn configured_model_takes_precedence() {
        let model = ScriptedModel::new(vec![]);
        let config = config_with(model, 5, 1);
        let resolved = resolve_model(&config).unwrap();
        assert_eq!(resolved.name(), "scripted");
    }

    #[tokio::test]
    async fn page_subset_instructions_agree_with_the_total() {
        let model = ScriptedModel::new(vec![
            ("pages 1-5 of a 7-page form (document pages 6-10)", BATCH_1, 0),
            ("pages 6-7 of a 7-page form (document pages 11-12)", BATCH_3, 0),
        ]);
        let subset: Vec<PageImage> = (6..=12)
            .map(|p| PageImage::new(p, vec![p as u8; 8], "image/png"))
            .collect();
        let config = config_with(model.clone(), 5, 1);
        let structure = extract_form_structure(&subset, &config).await.unwrap();

        assert_eq!(model.call_count(), 2);
        assert_eq!(structure.sections.len(), 3);
        assert_eq!(structure.sections[2].title, "Declaration");
    }

    #[tokio::test]
    async fn single_batch_section_order_is_dense() {
        let reply = r#"{"formTitle":"Survey","sections":[
            {"title":"First","order":2,"fields":[]},
            {"title":"Second","order":2,"fields":[]}]}"#;
        let model = ScriptedModel::new(vec![("form page", reply, 0)]);
        let config = config_with(model, 5, 1);
        let structure = extract_form_structure(&pages(1), &config).await.unwrap();
        let orders: Vec<_> = structure.sections.iter().map(|s| s.order).collect();
        assert_eq!(orders, [1, 2]);
    }
}
