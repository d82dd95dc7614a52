/*!
 * Export of one intake to Robaws.
 *
 * Creates the offer (or updates the one already mirrored locally), then
 * attaches every source file that the upload ledger does not know yet.
 * The ledger is keyed on (offer, SHA-256), so re-running an export never
 * uploads the same content twice.
 */

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use super::mapper::build_offer_payload;
use crate::app_config::ExportConfig;
use crate::database::models::{
    format_timestamp, now_timestamp, IntakeRecord, IntakeStatus, QuotationRecord, UploadRecord,
};
use crate::database::Repository;
use crate::errors::{ExportError, RobawsError};
use crate::extraction::ExtractionData;
use crate::file_utils::FileManager;
use crate::robaws::{OfferPayload, RobawsApi, RobawsOffer};

/// Longest delay between export retries
const MAX_RETRY_DELAY_SECS: u64 = 24 * 60 * 60;

/// How an export run ended
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub status: IntakeStatus,
    pub offer_id: Option<i64>,
    /// Documents sent in this run
    pub uploaded: usize,
    /// Documents skipped because the ledger already had them
    pub skipped: usize,
    pub error: Option<String>,
}

impl ExportOutcome {
    fn stopped(status: IntakeStatus, error: String) -> Self {
        Self {
            status,
            offer_id: None,
            uploaded: 0,
            skipped: 0,
            error: Some(error),
        }
    }
}

/// Delay before export attempt `attempts + 1`
pub fn retry_delay_secs(base_secs: u64, attempts: u32) -> u64 {
    let exponent = attempts.saturating_sub(1).min(20);
    base_secs
        .saturating_mul(1u64 << exponent)
        .min(MAX_RETRY_DELAY_SECS)
}

/// Pushes intakes to Robaws
#[derive(Debug, Clone)]
pub struct Exporter {
    repo: Repository,
    api: Arc<dyn RobawsApi>,
    config: ExportConfig,
}

impl Exporter {
    pub fn new(repo: Repository, api: Arc<dyn RobawsApi>, config: ExportConfig) -> Self {
        Self { repo, api, config }
    }

    /// Export one intake
    ///
    /// Robaws failures are recorded on the intake and reported in the
    /// outcome; only storage errors are returned as `Err`.
    pub async fn export_intake(&self, intake_id: &str) -> Result<ExportOutcome> {
        let intake = self
            .repo
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| anyhow!("Intake {} not found", intake_id))?;

        let Some(extraction) = self.repo.get_extraction(intake_id).await? else {
            return self.needs_contact(&intake, ExportError::MissingExtraction(intake.id.clone())).await;
        };
        if intake.robaws_client_id.is_none() {
            return self.needs_contact(&intake, ExportError::MissingClient(intake.id.clone())).await;
        }

        let data: ExtractionData = match serde_json::from_str(&extraction.data) {
            Ok(data) => data,
            Err(e) => {
                let message = format!("Stored extraction is unreadable: {}", e);
                error!("Intake {}: {}", intake.id, message);
                self.repo
                    .update_intake_status(intake_id, IntakeStatus::Failed, Some(message.clone()))
                    .await?;
                return Ok(ExportOutcome::stopped(IntakeStatus::Failed, message));
            }
        };

        let payload = build_offer_payload(&data, &intake, &self.config, Utc::now().date_naive())?;
        let attempts = self.repo.begin_export_attempt(intake_id).await?;
        info!("Exporting intake {} (attempt {})", intake.id, attempts);

        match self.push(&intake, &payload).await {
            Ok((offer_id, uploaded, skipped)) => {
                self.repo
                    .update_intake_status(intake_id, IntakeStatus::Exported, None)
                    .await?;
                info!(
                    "Intake {} exported to offer {} ({} uploaded, {} already present)",
                    intake.id, offer_id, uploaded, skipped
                );
                Ok(ExportOutcome {
                    status: IntakeStatus::Exported,
                    offer_id: Some(offer_id),
                    uploaded,
                    skipped,
                    error: None,
                })
            }
            Err(e) => self.record_failure(&intake, attempts, e).await,
        }
    }

    /// Create or update the offer, then upload missing documents
    async fn push(&self, intake: &IntakeRecord, payload: &OfferPayload) -> Result<(i64, usize, usize)> {
        let existing = self.repo.get_quotation(&intake.id).await?;
        let (offer, status) = match &existing {
            Some(quotation) => match self.api.update_offer(quotation.robaws_offer_id, payload).await {
                Ok(offer) => (offer, "updated"),
                Err(RobawsError::NotFound(_)) => {
                    warn!(
                        "Offer {} vanished from Robaws, creating a new one",
                        quotation.robaws_offer_id
                    );
                    (self.create_offer(payload).await?, "created")
                }
                Err(e) => return Err(e.into()),
            },
            None => (self.create_offer(payload).await?, "created"),
        };

        self.repo.set_intake_offer(&intake.id, offer.id).await?;
        let now = now_timestamp();
        self.repo
            .upsert_quotation(&QuotationRecord {
                id: 0,
                intake_id: intake.id.clone(),
                robaws_offer_id: offer.id,
                client_id: payload.client_id,
                contact_id: payload.contact_id,
                title: payload.title.clone(),
                payload: serde_json::to_string(payload)?,
                status: status.to_string(),
                created_at: existing.as_ref().map(|q| q.created_at.clone()).unwrap_or_else(|| now.clone()),
                updated_at: now,
            })
            .await?;

        if !self.config.attach_documents {
            return Ok((offer.id, 0, 0));
        }
        let (uploaded, skipped) = self.upload_documents(&intake.id, offer.id).await?;
        Ok((offer.id, uploaded, skipped))
    }

    async fn create_offer(&self, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError> {
        let offer = self.api.create_offer(payload).await?;
        info!(
            "Created Robaws offer {} ({})",
            offer.id,
            offer.logic_id.as_deref().unwrap_or("no number")
        );
        Ok(offer)
    }

    /// Upload files not in the ledger; returns (uploaded, skipped)
    async fn upload_documents(&self, intake_id: &str, offer_id: i64) -> Result<(usize, usize)> {
        let files = self.repo.get_intake_files(intake_id).await?;
        let mut seen = HashSet::new();
        let (mut uploaded, mut skipped) = (0, 0);

        for file in files {
            if !seen.insert(file.sha256.clone()) || self.repo.is_uploaded(offer_id, &file.sha256).await? {
                debug!("Skipping {} ({}), already on offer {}", file.filename, file.sha256, offer_id);
                skipped += 1;
                continue;
            }

            let bytes = FileManager::read_bytes(&file.storage_path)
                .with_context(|| format!("Failed to read stored file {}", file.storage_path))?;
            let document = self
                .api
                .upload_offer_document(offer_id, &file.filename, &file.mime_type, bytes)
                .await?;

            self.repo
                .record_upload(&UploadRecord {
                    robaws_offer_id: offer_id,
                    sha256: file.sha256.clone(),
                    intake_file_id: Some(file.id),
                    robaws_document_id: Some(document.id),
                    filename: file.filename.clone(),
                    uploaded_at: now_timestamp(),
                })
                .await?;
            uploaded += 1;
        }

        Ok((uploaded, skipped))
    }

    async fn needs_contact(&self, intake: &IntakeRecord, reason: ExportError) -> Result<ExportOutcome> {
        let message = reason.to_string();
        warn!("{}", message);
        self.repo
            .update_intake_status(&intake.id, IntakeStatus::NeedsContact, Some(message.clone()))
            .await?;
        Ok(ExportOutcome::stopped(IntakeStatus::NeedsContact, message))
    }

    async fn record_failure(&self, intake: &IntakeRecord, attempts: i64, e: anyhow::Error) -> Result<ExportOutcome> {
        let message = format!("{:#}", e);
        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);

        if attempts >= self.config.max_attempts {
            error!(
                "Export of intake {} failed for good after {} attempt(s): {}",
                intake.id, attempts, message
            );
            self.repo
                .schedule_retry(&intake.id, IntakeStatus::Failed, message.clone(), None)
                .await?;
            return Ok(ExportOutcome::stopped(IntakeStatus::Failed, message));
        }

        let delay = retry_delay_secs(self.config.retry_delay_secs, attempts);
        let next_attempt_at = format_timestamp(Utc::now() + chrono::Duration::seconds(delay as i64));
        warn!(
            "Export of intake {} failed (attempt {}/{}), retrying at {}: {}",
            intake.id, attempts, self.config.max_attempts, next_attempt_at, message
        );
        self.repo
            .schedule_retry(
                &intake.id,
                IntakeStatus::ExportFailed,
                message.clone(),
                Some(next_attempt_at),
            )
            .await?;

        let offer_id = self.repo.get_intake(&intake.id).await?.and_then(|i| i.robaws_offer_id);
        Ok(ExportOutcome {
            offer_id,
            ..ExportOutcome::stopped(IntakeStatus::ExportFailed, message)
        })
    }
}
