/*!
 * Extraction pipeline: documents in, `ExtractionData` out.
 *
 * Patterns always run. The LLM runs when enabled; if it fails but the
 * patterns found something, the pattern result is kept and the failure
 * is only logged.
 */

pub mod llm;
pub mod model;
pub mod patterns;

use log::{info, warn};
use std::sync::Arc;

use crate::app_config::ExtractionConfig;
use crate::database::models::{now_timestamp, ExtractionMethod, ExtractionRecord};
use crate::document::DocumentContent;
use crate::errors::ExtractionError;
use crate::providers::{ImageInput, Provider};

pub use llm::LlmExtractor;
pub use model::{merge, ExtractionData};
pub use patterns::PatternExtractor;

/// Confidence given to contact fields taken from the email envelope
const CONF_SENDER: f64 = 0.9;

/// Result of extracting one intake
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub data: ExtractionData,
    pub method: ExtractionMethod,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub raw_response: Option<String>,
    /// LLM failure that was tolerated because patterns found data
    pub llm_error: Option<String>,
}

impl ExtractionResult {
    /// Row to persist for `intake_id`
    pub fn to_record(&self, intake_id: &str) -> Result<ExtractionRecord, serde_json::Error> {
        Ok(ExtractionRecord {
            id: 0,
            intake_id: intake_id.to_string(),
            method: self.method,
            provider: self.provider.clone(),
            model: self.model.clone(),
            confidence: self.data.metadata.confidence,
            data: serde_json::to_string(&self.data)?,
            raw_response: self.raw_response.clone(),
            created_at: now_timestamp(),
        })
    }
}

/// Runs patterns and (optionally) the LLM over an intake's documents
#[derive(Debug, Clone)]
pub struct Extractor {
    patterns: PatternExtractor,
    llm: Option<LlmExtractor>,
}

impl Extractor {
    /// Build from config; `provider` is ignored when `use_llm` is off
    pub fn new(config: &ExtractionConfig, provider: Option<Arc<dyn Provider>>) -> Self {
        let llm = provider
            .filter(|_| config.use_llm)
            .map(|p| LlmExtractor::new(p, config.clone()));
        Self {
            patterns: PatternExtractor::new(&config.own_domains),
            llm,
        }
    }

    /// Whether an LLM is configured
    pub fn uses_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Extract from all documents of one intake
    pub async fn extract_documents(&self, docs: &[DocumentContent]) -> Result<ExtractionResult, ExtractionError> {
        let (text, images, sources) = combine(docs);
        if text.trim().is_empty() && images.is_empty() {
            return Err(ExtractionError::NoContent(format!("{} file(s) without text or images", docs.len())));
        }

        let mut pattern_data = self.patterns.extract(&text);
        self.apply_sender(&mut pattern_data, docs);

        let mut result = ExtractionResult {
            data: ExtractionData::default(),
            method: ExtractionMethod::Pattern,
            provider: None,
            model: None,
            raw_response: None,
            llm_error: None,
        };

        let llm_data = match &self.llm {
            Some(llm) => match llm.extract(&text, &images).await {
                Ok(outcome) => {
                    result.provider = Some(outcome.provider);
                    result.model = Some(outcome.model);
                    result.raw_response = Some(outcome.raw_response);
                    Some(outcome.data)
                }
                Err(e) if !pattern_data.is_empty() => {
                    warn!("LLM extraction failed, keeping pattern results: {}", e);
                    result.llm_error = Some(e.to_string());
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let (mut data, method) = merge(&pattern_data, llm_data.as_ref());
        data.metadata.sources = sources;
        if method == ExtractionMethod::Pattern {
            result.provider = None;
            result.model = None;
        }

        info!(
            "Extracted {} field(s) via {} (confidence {:.2})",
            data.field_count(),
            method,
            data.metadata.confidence
        );
        result.data = data;
        result.method = method;
        Ok(result)
    }

    /// Fill contact gaps from the email envelope
    fn apply_sender(&self, data: &mut ExtractionData, docs: &[DocumentContent]) {
        let Some(meta) = docs.iter().find_map(|d| d.email.as_ref()) else {
            return;
        };
        let Some(from) = meta.from_email.as_deref().filter(|f| !self.patterns.is_excluded_address(f)) else {
            return;
        };

        if data.contact.email.is_none() {
            data.contact.email = Some(from.to_string());
            data.metadata.field_confidence.insert("contact.email".to_string(), CONF_SENDER);
        }
        if data.contact.name.is_none() {
            if let Some(name) = &meta.from_name {
                data.contact.name = Some(name.clone());
                data.metadata.field_confidence.insert("contact.name".to_string(), CONF_SENDER);
            }
        }
        let found = &data.metadata.field_confidence;
        if !found.is_empty() {
            data.metadata.confidence = found.values().sum::<f64>() / found.len() as f64;
        }
    }
}

/// Concatenate document texts under per-file headers and collect images
fn combine(docs: &[DocumentContent]) -> (String, Vec<ImageInput>, Vec<String>) {
    let mut text = String::new();
    let mut images = Vec::new();
    let mut sources = Vec::new();

    for doc in docs.iter().filter(|d| !d.is_empty()) {
        if !doc.text.trim().is_empty() {
            text.push_str(&format!("=== {} ===\n{}\n\n", doc.filename, doc.text.trim()));
        }
        images.extend(doc.images.iter().cloned());
        sources.push(doc.filename.clone());
    }
    (text, images, sources)
}
