/*!
 * LLM-backed extraction.
 *
 * Sends the document text (and page images when vision is enabled) with
 * a fixed JSON schema instruction, then parses the answer leniently.
 */

use log::{debug, warn};
use std::sync::Arc;

use super::model::ExtractionData;
use crate::app_config::ExtractionConfig;
use crate::errors::{ExtractionError, ProviderError};
use crate::providers::{CompletionRequest, CompletionResponse, ImageInput, Provider};
use crate::retry::backoff_delay;

/// Confidence assumed when the model does not report one
const DEFAULT_LLM_CONFIDENCE: f64 = 0.75;

/// Vision requests carry at most this many images
const MAX_IMAGES_PER_REQUEST: usize = 8;

const SCHEMA_INSTRUCTION: &str = r#"Return a single JSON object with exactly this shape:
{
  "contact": {"name": string|null, "company": string|null, "email": string|null, "phone": string|null},
  "vehicle": {"make": string|null, "model": string|null, "year": number|null, "vin": string|null,
              "condition": "new"|"used"|"non-runner"|null, "quantity": number|null,
              "dimensions": {"length_m": number, "width_m": number, "height_m": number}|null,
              "weight_kg": number|null, "description": string|null},
  "shipment": {"origin": string|null, "pol": string|null, "pod": string|null, "destination": string|null,
               "container_type": string|null, "customer_reference": string|null},
  "metadata": {"confidence": number between 0 and 1}
}
"contact" is the customer asking for the quote, never the forwarder receiving it.
"pol" and "pod" are ports of loading and discharge; "origin" is where the cargo is picked up and
"destination" where it is delivered, when different from the ports. Convert dimensions to metres
and weight to kilograms."#;

/// What one LLM extraction produced
#[derive(Debug, Clone)]
pub struct LlmOutcome {
    pub data: ExtractionData,
    /// Answer text as received
    pub raw_response: String,
    pub provider: String,
    pub model: String,
}

/// Extraction through an LLM provider
#[derive(Debug, Clone)]
pub struct LlmExtractor {
    provider: Arc<dyn Provider>,
    config: ExtractionConfig,
}

impl LlmExtractor {
    /// Create an extractor on top of a provider
    pub fn new(provider: Arc<dyn Provider>, config: ExtractionConfig) -> Self {
        Self { provider, config }
    }

    /// Provider in use
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// User message: schema instruction followed by the (truncated) document
    pub fn build_prompt(&self, text: &str, image_count: usize) -> String {
        let limit = self.config.get_max_chars_per_request();
        let document = truncate_chars(text.trim(), limit);
        let mut prompt = String::with_capacity(SCHEMA_INSTRUCTION.len() + document.len() + 128);
        prompt.push_str(SCHEMA_INSTRUCTION);
        prompt.push_str("\n\n");
        if image_count > 0 {
            prompt.push_str(&format!(
                "{} image(s) of the inquiry are attached; read them as part of the document.\n\n",
                image_count
            ));
        }
        if document.is_empty() {
            prompt.push_str("The inquiry has no text apart from the attached images.");
        } else {
            prompt.push_str("Inquiry:\n\"\"\"\n");
            prompt.push_str(document);
            if document.len() < text.trim().len() {
                prompt.push_str("\n[truncated]");
            }
            prompt.push_str("\n\"\"\"");
        }
        prompt
    }

    /// Extract from text and images
    pub async fn extract(&self, text: &str, images: &[ImageInput]) -> Result<LlmOutcome, ExtractionError> {
        let images: Vec<ImageInput> = if self.config.use_vision {
            images.iter().take(MAX_IMAGES_PER_REQUEST).cloned().collect()
        } else {
            Vec::new()
        };
        if text.trim().is_empty() && images.is_empty() {
            return Err(ExtractionError::NoContent("empty document".to_string()));
        }

        let request = CompletionRequest::new(self.build_prompt(text, images.len()))
            .system(self.config.system_prompt.clone())
            .images(images)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens)
            .json_mode();

        let response = self.complete_with_retry(request).await?;
        debug!(
            "{} answered with {} chars (tokens in/out: {:?}/{:?})",
            self.provider.name(),
            response.text.len(),
            response.prompt_tokens,
            response.completion_tokens
        );

        let mut data = parse_response(&response.text)?;
        if !data.is_empty() && data.metadata.confidence <= 0.0 {
            data.metadata.confidence = DEFAULT_LLM_CONFIDENCE;
        }

        Ok(LlmOutcome {
            data,
            raw_response: response.text,
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
        })
    }

    async fn complete_with_retry(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let max_retries = self.config.retry_count;
        let mut attempt = 0;

        loop {
            match self.provider.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_backoff_ms, attempt);
                    warn!(
                        "{} request failed ({}), retry {}/{} in {:?}",
                        self.provider.name(),
                        e,
                        attempt,
                        max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a model answer into `ExtractionData`
///
/// Tolerates markdown fences and prose around the JSON object.
pub fn parse_response(text: &str) -> Result<ExtractionData, ExtractionError> {
    let body = strip_code_fences(text);
    let json = outermost_json_object(body).ok_or_else(|| {
        ExtractionError::InvalidResponse(format!("no JSON object in answer: {}", preview(text)))
    })?;

    let mut data: ExtractionData = serde_json::from_str(json)
        .map_err(|e| ExtractionError::InvalidResponse(format!("{}: {}", e, preview(json))))?;
    data.normalize_blanks();
    data.clamp_confidence();
    Ok(data)
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn outermost_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// At most `max_chars` characters, cut on a char boundary
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

fn preview(text: &str) -> String {
    let cut = truncate_chars(text, 200);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}
