/*!
 * Pipeline orchestration.
 *
 * `Controller` runs an intake through its remaining stages:
 * extract, resolve, export. The stage to start from is taken from the
 * intake's status, so a run picks up where the previous one stopped.
 * Stage failures end up in the intake's status and `last_error`; only
 * storage errors are returned to the caller.
 */

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::app_config::Config;
use crate::database::models::{
    format_timestamp, ExtractionRecord, IntakeFileRecord, IntakeRecord, IntakeStatus, QuotationRecord,
};
use crate::database::{DatabaseStats, Repository};
use crate::document::load_document;
use crate::export::job::retry_delay_secs;
use crate::export::Exporter;
use crate::extraction::{ExtractionData, Extractor};
use crate::ingest::Ingestor;
use crate::providers::{create_provider, Provider};
use crate::resolver::{ContactHint, Resolution, Resolver};
use crate::robaws::{HttpRobawsClient, RobawsApi};

/// Everything stored about one intake
#[derive(Debug, Clone)]
pub struct IntakeDetails {
    pub intake: IntakeRecord,
    pub files: Vec<IntakeFileRecord>,
    pub extraction: Option<ExtractionRecord>,
    pub quotation: Option<QuotationRecord>,
}

/// Result of `run_path`: final status per intake
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub intakes: Vec<(String, IntakeStatus)>,
}

impl RunSummary {
    /// Intakes per final status
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, status) in &self.intakes {
            *counts.entry(status.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

/// Main application controller for the intake pipeline
#[derive(Debug)]
pub struct Controller {
    config: Config,
    repo: Repository,
    ingestor: Ingestor,
    extractor: Extractor,
    resolver: Resolver,
    exporter: Exporter,
}

impl Controller {
    /// Controller backed by the configured database, Robaws and LLM provider
    pub fn with_config(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        let repo = Repository::new(crate::database::DatabaseConnection::new(&db_path)?);
        let api: Arc<dyn RobawsApi> =
            Arc::new(HttpRobawsClient::new(&config.robaws).context("Failed to create Robaws client")?);
        let provider = config
            .extraction
            .use_llm
            .then(|| create_provider(&config.extraction));
        Self::with_parts(config, repo, api, provider)
    }

    /// Controller over explicit parts
    pub fn with_parts(
        config: Config,
        repo: Repository,
        api: Arc<dyn RobawsApi>,
        provider: Option<Arc<dyn Provider>>,
    ) -> Result<Self> {
        let files_dir = config.files_dir()?;
        Ok(Self {
            ingestor: Ingestor::new(repo.clone(), files_dir),
            extractor: Extractor::new(&config.extraction, provider),
            resolver: Resolver::new(api.clone(), config.resolver.clone(), &config.robaws),
            exporter: Exporter::new(repo.clone(), api, config.export.clone()),
            repo,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Ingest a file or directory without processing
    pub async fn ingest<P: AsRef<Path>>(&self, path: P) -> Result<Vec<IntakeRecord>> {
        self.ingestor.ingest_path(path).await
    }

    /// Ingest a file or directory and process every new intake
    pub async fn run_path<P: AsRef<Path>>(&self, path: P) -> Result<RunSummary> {
        let start_time = std::time::Instant::now();
        let intakes = self.ingestor.ingest_path(path).await?;

        let progress_bar = ProgressBar::new(intakes.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} intakes ({percent}%) {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));

        let mut summary = RunSummary::default();
        for intake in intakes {
            progress_bar.set_message(intake.subject.clone().unwrap_or_default());
            let status = match self.process_record(intake.clone()).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Intake {} failed: {:#}", intake.id, e);
                    IntakeStatus::Failed
                }
            };
            summary.intakes.push((intake.id, status));
            progress_bar.inc(1);
        }
        progress_bar.finish_and_clear();

        info!(
            "Processed {} intake(s) in {:.1}s: {:?}",
            summary.intakes.len(),
            start_time.elapsed().as_secs_f64(),
            summary.counts()
        );
        Ok(summary)
    }

    /// Run the remaining stages of an intake
    pub async fn process_intake(&self, intake_id: &str) -> Result<IntakeStatus> {
        let intake = self
            .repo
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| anyhow!("Intake {} not found", intake_id))?;
        self.process_record(intake).await
    }

    /// Run the remaining stages starting from the status carried by `intake`
    ///
    /// Workers pass the record as claimed, which holds the status from
    /// before the claim.
    pub async fn process_record(&self, intake: IntakeRecord) -> Result<IntakeStatus> {
        let id = intake.id.clone();
        match self.run_stages(intake).await {
            Ok(status) => Ok(status),
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Processing intake {} failed: {}", id, message);
                // Best effort: the error may come from the database itself
                if let Err(store_err) = self
                    .repo
                    .update_intake_status(&id, IntakeStatus::Failed, Some(message))
                    .await
                {
                    warn!("Could not record failure of intake {}: {}", id, store_err);
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, intake: IntakeRecord) -> Result<IntakeStatus> {
        let mut status = match intake.status {
            IntakeStatus::Exported => {
                info!("Intake {} is already exported", intake.id);
                return Ok(IntakeStatus::Exported);
            }
            IntakeStatus::Pending | IntakeStatus::Processing | IntakeStatus::Failed => {
                self.extract(&intake).await?
            }
            other => other,
        };

        if matches!(status, IntakeStatus::Extracted | IntakeStatus::NeedsContact) {
            status = self.resolve(&intake.id).await?;
        }
        if matches!(
            status,
            IntakeStatus::Ready | IntakeStatus::ExportFailed | IntakeStatus::Exporting
        ) {
            status = self.exporter.export_intake(&intake.id).await?.status;
        }
        Ok(status)
    }

    /// Extraction stage; returns `Extracted` or `Failed`
    async fn extract(&self, intake: &IntakeRecord) -> Result<IntakeStatus> {
        self.repo
            .update_intake_status(&intake.id, IntakeStatus::Processing, None)
            .await?;

        let files = self.repo.get_intake_files(&intake.id).await?;
        let mut docs = Vec::with_capacity(files.len());
        for file in files.iter().filter(|f| f.kind.is_readable()) {
            match load_document(file) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("Skipping {} of intake {}: {}", file.filename, intake.id, e),
            }
        }
        debug!("Intake {}: {} readable document(s)", intake.id, docs.len());

        let result = match self.extractor.extract_documents(&docs).await {
            Ok(result) => result,
            Err(e) => {
                let message = e.to_string();
                warn!("Extraction of intake {} failed: {}", intake.id, message);
                self.repo
                    .update_intake_status(&intake.id, IntakeStatus::Failed, Some(message))
                    .await?;
                return Ok(IntakeStatus::Failed);
            }
        };

        self.repo.upsert_extraction(&result.to_record(&intake.id)?).await?;
        let contact = &result.data.contact;
        self.repo
            .update_intake_contact(
                &intake.id,
                contact.company.clone().or_else(|| contact.name.clone()),
                contact.email.clone(),
                contact.phone.clone(),
            )
            .await?;
        self.repo
            .update_intake_status(&intake.id, IntakeStatus::Extracted, result.llm_error)
            .await?;
        info!(
            "Intake {} extracted via {} ({} fields)",
            intake.id,
            result.method,
            result.data.field_count()
        );
        Ok(IntakeStatus::Extracted)
    }

    /// Resolution stage; returns `Ready`, `NeedsContact`, `Failed` or `Extracted` (retry later)
    async fn resolve(&self, intake_id: &str) -> Result<IntakeStatus> {
        let Some(extraction) = self.repo.get_extraction(intake_id).await? else {
            return Err(anyhow!("Intake {} has no extraction", intake_id));
        };
        let data: ExtractionData =
            serde_json::from_str(&extraction.data).context("Stored extraction is unreadable")?;

        let hint = ContactHint::from_extraction(&data);
        if hint.is_empty() {
            self.repo
                .update_intake_status(
                    intake_id,
                    IntakeStatus::NeedsContact,
                    Some("No contact details found in the inquiry".to_string()),
                )
                .await?;
            return Ok(IntakeStatus::NeedsContact);
        }

        match self.resolver.resolve_or_create(&hint).await {
            Ok(Some(resolution)) => {
                self.repo
                    .set_intake_client(intake_id, resolution.client_id, resolution.contact_id)
                    .await?;
                // Export attempts start from zero once the client is known
                self.repo.requeue_intake(intake_id, IntakeStatus::Ready).await?;
                Ok(IntakeStatus::Ready)
            }
            Ok(None) => {
                self.repo
                    .update_intake_status(
                        intake_id,
                        IntakeStatus::NeedsContact,
                        Some("No matching Robaws client".to_string()),
                    )
                    .await?;
                Ok(IntakeStatus::NeedsContact)
            }
            Err(e) if !e.is_transient() => {
                error!("Client resolution for intake {} failed for good: {}", intake_id, e);
                self.repo
                    .schedule_retry(intake_id, IntakeStatus::Failed, e.to_string(), None)
                    .await?;
                Ok(IntakeStatus::Failed)
            }
            Err(e) => {
                let attempts = self.repo.count_failed_attempt(intake_id).await?;
                let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
                if attempts >= self.config.export.max_attempts {
                    error!(
                        "Client resolution for intake {} failed after {} attempt(s): {}",
                        intake_id, attempts, e
                    );
                    self.repo
                        .schedule_retry(intake_id, IntakeStatus::Failed, e.to_string(), None)
                        .await?;
                    return Ok(IntakeStatus::Failed);
                }

                // Keep the extraction and let the worker try again
                let delay = retry_delay_secs(self.config.export.retry_delay_secs, attempts);
                let next = format_timestamp(Utc::now() + chrono::Duration::seconds(delay as i64));
                warn!(
                    "Client resolution for intake {} failed (attempt {}/{}), retrying at {}: {}",
                    intake_id, attempts, self.config.export.max_attempts, next, e
                );
                self.repo
                    .schedule_retry(intake_id, IntakeStatus::Extracted, e.to_string(), Some(next))
                    .await?;
                Ok(IntakeStatus::Extracted)
            }
        }
    }

    /// Export an intake that already has an extraction
    pub async fn export(&self, intake_id: &str) -> Result<IntakeStatus> {
        if self.repo.get_extraction(intake_id).await?.is_none() {
            return Err(anyhow!(
                "Intake {} has not been extracted yet, run `process` first",
                intake_id
            ));
        }
        Ok(self.exporter.export_intake(intake_id).await?.status)
    }

    /// Resolve a contact without touching any intake
    pub async fn resolve_hint(&self, hint: &ContactHint) -> Result<Option<Resolution>> {
        Ok(self.resolver.resolve(hint).await?)
    }

    /// Put an intake back in the queue with fresh retry bookkeeping
    ///
    /// The status is chosen from what is already stored: an intake with a
    /// client goes straight to export, one with an extraction to resolution.
    pub async fn retry(&self, intake_id: &str) -> Result<IntakeStatus> {
        let intake = self
            .repo
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| anyhow!("Intake {} not found", intake_id))?;
        if intake.status == IntakeStatus::Exported {
            return Err(anyhow!("Intake {} is already exported", intake_id));
        }

        let has_extraction = self.repo.get_extraction(intake_id).await?.is_some();
        let status = match (has_extraction, intake.robaws_client_id) {
            (true, Some(_)) => IntakeStatus::Ready,
            (true, None) => IntakeStatus::Extracted,
            (false, _) => IntakeStatus::Pending,
        };
        if status == IntakeStatus::Extracted {
            // A new attempt must not reuse a cached miss
            self.resolver.clear_cache();
        }
        self.repo.requeue_intake(intake_id, status).await?;
        info!("Intake {} requeued as {}", intake_id, status);
        Ok(status)
    }

    pub async fn list(&self, status: Option<IntakeStatus>, limit: usize) -> Result<Vec<IntakeRecord>> {
        self.repo.list_intakes(status, limit).await
    }

    pub async fn show(&self, intake_id: &str) -> Result<IntakeDetails> {
        let intake = self
            .repo
            .get_intake(intake_id)
            .await?
            .ok_or_else(|| anyhow!("Intake {} not found", intake_id))?;
        Ok(IntakeDetails {
            files: self.repo.get_intake_files(intake_id).await?,
            extraction: self.repo.get_extraction(intake_id).await?,
            quotation: self.repo.get_quotation(intake_id).await?,
            intake,
        })
    }

    pub async fn stats(&self) -> Result<DatabaseStats> {
        self.repo.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::IntakeSource;
    use crate::errors::RobawsError;
    use crate::providers::mock::MockProvider;
    use crate::robaws::mock::MockRobaws;
    use crate::robaws::RobawsClient;
    use tempfile::TempDir;

    const INQUIRY: &str = "Hello,\n\nPlease quote RoRo for a used 2018 Toyota Hilux from Antwerp to Lagos.\n\
Dimensions 5.33 x 1.86 x 1.80 m, weight 2100 kg.\n\nKind regards,\nJan Peeters\nAcme Trading BV\n\
jan@acme-trading.be\n";

    fn controller(mock: &MockRobaws, dir: &TempDir) -> Controller {
        let mut config = Config::default();
        config.extraction.use_llm = false;
        config.storage.files_dir = Some(dir.path().join("files"));
        config.storage.database_path = Some(dir.path().join("intake.db"));
        Controller::with_parts(
            config,
            Repository::new_in_memory().unwrap(),
            Arc::new(mock.clone()),
            None,
        )
        .unwrap()
    }

    fn acme() -> RobawsClient {
        RobawsClient {
            id: 12,
            name: "Acme Trading".to_string(),
            email: Some("jan@acme-trading.be".to_string()),
            ..RobawsClient::default()
        }
    }

    #[tokio::test]
    async fn test_processIntake_shouldRunAllStagesToExported() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::with_clients(vec![acme()]);
        let controller = controller(&mock, &dir);
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        let status = controller.process_intake(&intake.id).await.unwrap();

        assert_eq!(status, IntakeStatus::Exported);
        let details = controller.show(&intake.id).await.unwrap();
        assert_eq!(details.intake.robaws_client_id, Some(12));
        assert_eq!(details.intake.contact_email.as_deref(), Some("jan@acme-trading.be"));
        assert!(details.quotation.is_some());
        assert_eq!(mock.uploads().len(), 1);
        assert!(mock.offers()[0].1.title.contains("Antwerp > Lagos"));
    }

    #[tokio::test]
    async fn test_processIntake_unknownClient_shouldStopAtNeedsContact() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::new();
        let controller = controller(&mock, &dir);
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        let status = controller.process_intake(&intake.id).await.unwrap();
        assert_eq!(status, IntakeStatus::NeedsContact);

        // Client shows up in Robaws; a retry resumes at resolution
        mock.add_client(acme());
        assert_eq!(controller.retry(&intake.id).await.unwrap(), IntakeStatus::Extracted);
        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Exported);
    }

    #[tokio::test]
    async fn test_processIntake_resolveRejected_shouldFailWithoutRetry() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::with_clients(vec![acme()]);
        mock.fail_next_lookups(vec![RobawsError::Unauthorized("invalid credentials".to_string())]);
        let controller = controller(&mock, &dir);
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Failed);
        let stored = controller.show(&intake.id).await.unwrap().intake;
        assert!(stored.next_attempt_at.is_none());
        assert_eq!(stored.attempts, 0);
        assert!(stored.last_error.unwrap().contains("invalid credentials"));
    }

    #[tokio::test]
    async fn test_processIntake_resolveOutage_shouldStopAtMaxAttempts() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::with_clients(vec![acme()]);
        let outage = || RobawsError::Http {
            status: 503,
            body: "maintenance".to_string(),
        };
        mock.fail_next_lookups(vec![outage(), outage()]);
        let mut config = Config::default();
        config.extraction.use_llm = false;
        config.storage.files_dir = Some(dir.path().join("files"));
        config.export.max_attempts = 2;
        let controller = Controller::with_parts(
            config,
            Repository::new_in_memory().unwrap(),
            Arc::new(mock.clone()),
            None,
        )
        .unwrap();
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Extracted);
        let stored = controller.show(&intake.id).await.unwrap().intake;
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at.is_some());

        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Failed);
        let stored = controller.show(&intake.id).await.unwrap().intake;
        assert_eq!(stored.attempts, 2);
        assert!(stored.next_attempt_at.is_none());

        // Robaws is back; an explicit retry resolves and exports
        assert_eq!(controller.retry(&intake.id).await.unwrap(), IntakeStatus::Extracted);
        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Exported);
        assert_eq!(mock.offers().len(), 1);
    }

    #[tokio::test]
    async fn test_processIntake_noContent_shouldFail() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::new();
        let controller = controller(&mock, &dir);
        let intake = controller
            .ingestor()
            .ingest_bytes("blank.txt", b"   ", IntakeSource::Upload)
            .await
            .unwrap();

        assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Failed);
        let stored = controller.show(&intake.id).await.unwrap().intake;
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_processIntake_withLlm_shouldStoreHybridExtraction() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::with_clients(vec![acme()]);
        let mut config = Config::default();
        config.extraction.retry_backoff_ms = 1;
        config.storage.files_dir = Some(dir.path().join("files"));
        let provider = Arc::new(MockProvider::answering(
            r#"{"shipment":{"container_type":"40ft HC"},"metadata":{"confidence":0.8}}"#,
        ));
        let controller = Controller::with_parts(
            config,
            Repository::new_in_memory().unwrap(),
            Arc::new(mock.clone()),
            Some(provider),
        )
        .unwrap();
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        controller.process_intake(&intake.id).await.unwrap();

        let extraction = controller.show(&intake.id).await.unwrap().extraction.unwrap();
        assert_eq!(extraction.method.to_string(), "hybrid");
        assert_eq!(extraction.provider.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_export_beforeExtraction_shouldError() {
        let dir = TempDir::new().unwrap();
        let mock = MockRobaws::new();
        let controller = controller(&mock, &dir);
        let intake = controller
            .ingestor()
            .ingest_bytes("inquiry.txt", INQUIRY.as_bytes(), IntakeSource::Upload)
            .await
            .unwrap();

        assert!(controller.export(&intake.id).await.is_err());
        assert_eq!(controller.show(&intake.id).await.unwrap().intake.status, IntakeStatus::Pending);
    }

    #[tokio::test]
    async fn test_runPath_shouldSummariseStatuses() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();
        std::fs::write(inbox.join("one.txt"), INQUIRY).unwrap();
        std::fs::write(inbox.join("two.txt"), "   ").unwrap();
        let mock = MockRobaws::with_clients(vec![acme()]);
        let controller = controller(&mock, &dir);

        let summary = controller.run_path(&inbox).await.unwrap();

        let counts = summary.counts();
        assert_eq!(counts.get("exported"), Some(&1));
        assert_eq!(counts.get("failed"), Some(&1));
    }
}
