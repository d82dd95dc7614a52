/*!
 * Database entity models and DTOs.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data.
 */

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::file_utils::FileKind;

/// Current time in the format stored in every timestamp column
///
/// Second precision with a `Z` suffix, so lexical order equals time order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format an arbitrary UTC instant like `now_timestamp`
pub fn format_timestamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lifecycle of an intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    /// Created, files stored, nothing extracted yet
    Pending,
    /// Claimed by a worker
    Processing,
    /// Extraction stored, client not resolved yet
    Extracted,
    /// No Robaws client could be matched; needs a human or a retry
    NeedsContact,
    /// Client resolved, ready for export
    Ready,
    /// Offer being created or updated
    Exporting,
    /// Offer created and documents attached
    Exported,
    /// Export failed; will be retried after `next_attempt_at`
    ExportFailed,
    /// Gave up
    Failed,
}

impl IntakeStatus {
    /// Whether a worker may pick this intake up on its own
    pub fn is_runnable(&self) -> bool {
        matches!(
            self,
            IntakeStatus::Pending
                | IntakeStatus::Extracted
                | IntakeStatus::Ready
                | IntakeStatus::ExportFailed
        )
    }

    /// Whether the intake reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntakeStatus::Exported | IntakeStatus::Failed)
    }
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntakeStatus::Pending => "pending",
            IntakeStatus::Processing => "processing",
            IntakeStatus::Extracted => "extracted",
            IntakeStatus::NeedsContact => "needs_contact",
            IntakeStatus::Ready => "ready",
            IntakeStatus::Exporting => "exporting",
            IntakeStatus::Exported => "exported",
            IntakeStatus::ExportFailed => "export_failed",
            IntakeStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for IntakeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(IntakeStatus::Pending),
            "processing" => Ok(IntakeStatus::Processing),
            "extracted" => Ok(IntakeStatus::Extracted),
            "needs_contact" => Ok(IntakeStatus::NeedsContact),
            "ready" => Ok(IntakeStatus::Ready),
            "exporting" => Ok(IntakeStatus::Exporting),
            "exported" => Ok(IntakeStatus::Exported),
            "export_failed" => Ok(IntakeStatus::ExportFailed),
            "failed" => Ok(IntakeStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid intake status: {}", s)),
        }
    }
}

/// Where an intake came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeSource {
    /// Forwarded or dropped .eml message
    Email,
    /// Manually uploaded file
    Upload,
    /// Created programmatically
    Api,
}

impl fmt::Display for IntakeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeSource::Email => write!(f, "email"),
            IntakeSource::Upload => write!(f, "upload"),
            IntakeSource::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for IntakeSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(IntakeSource::Email),
            "upload" => Ok(IntakeSource::Upload),
            "api" => Ok(IntakeSource::Api),
            _ => Err(anyhow::anyhow!("Invalid intake source: {}", s)),
        }
    }
}

/// How an extraction was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Regex patterns only
    Pattern,
    /// LLM only
    Llm,
    /// Both contributed
    Hybrid,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionMethod::Pattern => write!(f, "pattern"),
            ExtractionMethod::Llm => write!(f, "llm"),
            ExtractionMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for ExtractionMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pattern" => Ok(ExtractionMethod::Pattern),
            "llm" => Ok(ExtractionMethod::Llm),
            "hybrid" => Ok(ExtractionMethod::Hybrid),
            _ => Err(anyhow::anyhow!("Invalid extraction method: {}", s)),
        }
    }
}

/// Intake record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeRecord {
    /// Unique identifier (UUID)
    pub id: String,
    /// Origin of the inquiry
    pub source: IntakeSource,
    /// Current status
    pub status: IntakeStatus,
    /// Email subject or file name
    pub subject: Option<String>,
    /// From address of the source email
    pub sender_email: Option<String>,
    /// From display name of the source email
    pub sender_name: Option<String>,
    /// Customer company name from extraction
    pub customer_name: Option<String>,
    /// Contact email from extraction
    pub contact_email: Option<String>,
    /// Contact phone from extraction
    pub contact_phone: Option<String>,
    /// Resolved Robaws client
    pub robaws_client_id: Option<i64>,
    /// Resolved Robaws contact person
    pub robaws_contact_id: Option<i64>,
    /// Exported Robaws offer
    pub robaws_offer_id: Option<i64>,
    /// Export attempts so far
    pub attempts: i64,
    /// Last error message
    pub last_error: Option<String>,
    /// Earliest time a worker may retry
    pub next_attempt_at: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
    /// When the export succeeded
    pub exported_at: Option<String>,
}

impl IntakeRecord {
    /// Create a new pending intake
    pub fn new(source: IntakeSource, subject: Option<String>) -> Self {
        let now = now_timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            status: IntakeStatus::Pending,
            subject,
            sender_email: None,
            sender_name: None,
            customer_name: None,
            contact_email: None,
            contact_phone: None,
            robaws_client_id: None,
            robaws_contact_id: None,
            robaws_offer_id: None,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now.clone(),
            updated_at: now,
            exported_at: None,
        }
    }
}

/// Stored source file of an intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeFileRecord {
    /// Database ID (auto-increment)
    pub id: i64,
    /// Owning intake
    pub intake_id: String,
    /// Email this file was extracted from, when it is an attachment
    pub parent_file_id: Option<i64>,
    /// Original file name
    pub filename: String,
    /// Path in the content-addressed store
    pub storage_path: String,
    /// MIME type
    pub mime_type: String,
    /// Detected kind
    pub kind: FileKind,
    /// Size in bytes
    pub size_bytes: i64,
    /// Hex SHA-256 of the content
    pub sha256: String,
    /// Creation timestamp
    pub created_at: String,
}

impl IntakeFileRecord {
    /// Create a new file record (ID assigned on insert)
    pub fn new(
        intake_id: String,
        filename: String,
        storage_path: String,
        mime_type: String,
        kind: FileKind,
        size_bytes: i64,
        sha256: String,
    ) -> Self {
        Self {
            id: 0,
            intake_id,
            parent_file_id: None,
            filename,
            storage_path,
            mime_type,
            kind,
            size_bytes,
            sha256,
            created_at: now_timestamp(),
        }
    }

    /// Mark this file as an attachment of another stored file
    pub fn with_parent(mut self, parent_file_id: i64) -> Self {
        self.parent_file_id = Some(parent_file_id);
        self
    }
}

/// Stored extraction result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Database ID (auto-increment)
    pub id: i64,
    /// Owning intake
    pub intake_id: String,
    /// How it was produced
    pub method: ExtractionMethod,
    /// LLM provider, if any
    pub provider: Option<String>,
    /// LLM model, if any
    pub model: Option<String>,
    /// Overall confidence (0.0-1.0)
    pub confidence: f64,
    /// Serialized `ExtractionData`
    pub data: String,
    /// Raw LLM answer for debugging
    pub raw_response: Option<String>,
    /// Creation timestamp
    pub created_at: String,
}

/// Local mirror of a Robaws offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotationRecord {
    /// Database ID (auto-increment)
    pub id: i64,
    /// Owning intake
    pub intake_id: String,
    /// Offer ID in Robaws
    pub robaws_offer_id: i64,
    /// Client the offer belongs to
    pub client_id: i64,
    /// Contact person on the offer
    pub contact_id: Option<i64>,
    /// Offer title
    pub title: String,
    /// JSON payload last sent
    pub payload: String,
    /// `created` or `updated`
    pub status: String,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// One document pushed to a Robaws offer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Offer the document is attached to
    pub robaws_offer_id: i64,
    /// Hex SHA-256 of the uploaded bytes
    pub sha256: String,
    /// Source file, if still present
    pub intake_file_id: Option<i64>,
    /// Document ID returned by Robaws
    pub robaws_document_id: Option<i64>,
    /// File name sent
    pub filename: String,
    /// Upload timestamp
    pub uploaded_at: String,
}
