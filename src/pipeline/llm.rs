//! Model interaction: build the batch request, call the model, parse the answer.
//!
//! [`VisionModel`] is the seam between the pipeline and whatever answers the
//! request. [`ProviderModel`] adapts any `edgequake_llm` provider; tests
//! plug in scripted models. [`extract_batch`] is the only pipeline step with
//! an external call, and it makes exactly one per batch: retrying is left to
//! the caller, who can re-run the whole document.

use crate::config::ExtractionConfig;
use crate::error::FormExtractError;
use crate::pipeline::batch::PageBatch;
use crate::pipeline::encode::to_image_data;
use crate::pipeline::parse::{is_refusal, parse_response};
use crate::prompts::{batch_instruction, EXTRACTION_SYSTEM_PROMPT};
use crate::schema::RawStructure;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// One model request: a system contract, a task instruction, ordered images.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub instruction: String,
    pub images: Vec<ImageData>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Raw text answer plus token accounting.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anything that can answer a multimodal extraction request with text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Provider or model name, for logs and error messages.
    fn name(&self) -> &str;

    /// Send one request. Quota, auth, and timeout failures must be reported
    /// with their dedicated [`FormExtractError`] variants; a timeout seen
    /// here has no page context, so report it as `ProviderTimeout`.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, FormExtractError>;
}

/// [`VisionModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl VisionModel for ProviderModel {
    fn name(&self) -> &str {
        &self.name
    }

    /// Message layout: the system contract, then one user turn carrying the
    /// task instruction and every page image of the batch, in page order.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply, FormExtractError> {
        let messages = vec![
            ChatMessage::system(request.system.as_str()),
            ChatMessage::user_with_images(request.instruction.as_str(), request.images.clone()),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_provider_error(&self.name, &e.to_string()))?;

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Map a provider error message onto the pipeline's upstream error kinds.
pub fn classify_provider_error(provider: &str, message: &str) -> FormExtractError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["429", "rate limit", "rate_limit", "quota", "too many requests"]) {
        FormExtractError::UpstreamQuota {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if has(&["401", "403", "unauthorized", "forbidden", "api key", "api_key", "authentication"]) {
        FormExtractError::UpstreamAuth {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else if has(&["timed out", "timeout"]) {
        FormExtractError::ProviderTimeout {
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    } else {
        FormExtractError::LlmApiError {
            message: message.to_string(),
        }
    }
}

/// A normalised batch answer with its cost.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub structure: RawStructure,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// Extract the form structure of one batch of pages.
///
/// Refusal detection runs on the raw reply before any parsing; an empty
/// reply, a refusal, and unparseable JSON are distinct errors. A parseable
/// but structurally odd reply is normalised, never rejected.
pub async fn extract_batch(
    model: &dyn VisionModel,
    batch: &PageBatch<'_>,
    total_pages: usize,
    config: &ExtractionConfig,
) -> Result<BatchResult, FormExtractError> {
    let start = Instant::now();
    let (start_page, end_page) = (batch.start_page, batch.end_page());

    let request = ModelRequest {
        system: config
            .system_prompt
            .clone()
            .unwrap_or_else(|| EXTRACTION_SYSTEM_PROMPT.to_string()),
        instruction: batch_instruction(batch, total_pages),
        images: batch.images.iter().map(to_image_data).collect(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    info!(
        "Batch {}: pages {}-{} → {}",
        batch.index + 1,
        start_page,
        end_page,
        model.name()
    );

    let limit = Duration::from_secs(config.api_timeout_secs);
    let reply = match timeout(limit, model.generate(&request)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(FormExtractError::ProviderTimeout { .. } | FormExtractError::ApiTimeout { .. }))
        | Err(_) => {
            return Err(FormExtractError::ApiTimeout {
                start_page,
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
        Ok(Err(e)) => return Err(e),
    };

    let text = reply.content.trim();
    if text.is_empty() {
        warn!("Batch {}: empty model response", batch.index + 1);
        return Err(FormExtractError::EmptyResponse {
            start_page,
            end_page,
        });
    }

    if is_refusal(text) {
        warn!(
            "Batch {}: model refused (pages {}-{}): {}",
            batch.index + 1,
            start_page,
            end_page,
            text
        );
        return Err(FormExtractError::Refusal {
            start_page,
            end_page,
        });
    }

    let structure = parse_response(text).map_err(|source| {
        warn!(
            "Batch {}: malformed model output ({}): {}",
            batch.index + 1,
            source.detail,
            source.raw_text
        );
        FormExtractError::MalformedOutput {
            start_page,
            end_page,
            source,
        }
    })?;

    let duration = start.elapsed();
    debug!(
        "Batch {}: {} sections, {} fields, {} input tokens, {} output tokens, {:?}",
        batch.index + 1,
        structure.sections.len(),
        structure.field_count(),
        reply.input_tokens,
        reply.output_tokens,
        duration
    );

    Ok(BatchResult {
        structure,
        input_tokens: reply.input_tokens,
        output_tokens: reply.output_tokens,
        duration_ms: duration.as_millis() as u64,
    })
}
