/*!
 * Turning dropped files and emails into intakes.
 *
 * Every source file is written to the content-addressed store first and
 * then recorded against its intake. Attachments of an email become child
 * files of the email so the extractor and the export see them separately.
 */

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::database::models::{IntakeFileRecord, IntakeRecord, IntakeSource};
use crate::database::Repository;
use crate::document::{parse_email, ParsedEmail};
use crate::file_utils::{FileKind, FileManager};

/// Creates intakes from files on disk or in memory
#[derive(Debug, Clone)]
pub struct Ingestor {
    repo: Repository,
    files_dir: PathBuf,
}

impl Ingestor {
    pub fn new(repo: Repository, files_dir: PathBuf) -> Self {
        Self { repo, files_dir }
    }

    /// One intake per file; directories are walked recursively
    pub async fn ingest_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<IntakeRecord>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow!("Path does not exist: {:?}", path));
        }

        let files = if path.is_dir() {
            FileManager::find_intake_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut intakes = Vec::with_capacity(files.len());
        for file in files {
            let bytes = FileManager::read_bytes(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "file".to_string());
            let source = match FileManager::detect_file_kind(&filename, &bytes) {
                FileKind::Email => IntakeSource::Email,
                _ => IntakeSource::Upload,
            };
            intakes.push(self.ingest_bytes(&filename, &bytes, source).await?);
        }

        info!("Ingested {} intake(s) from {:?}", intakes.len(), path);
        Ok(intakes)
    }

    /// Create a pending intake from one file
    pub async fn ingest_bytes(&self, filename: &str, bytes: &[u8], source: IntakeSource) -> Result<IntakeRecord> {
        let kind = FileManager::detect_file_kind(filename, bytes);
        let email = if kind == FileKind::Email {
            match parse_email(bytes) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("{} looks like an email but could not be parsed: {}", filename, e);
                    None
                }
            }
        } else {
            None
        };

        let subject = email
            .as_ref()
            .and_then(|e| e.meta.subject.clone())
            .or_else(|| Some(filename.to_string()));
        let mut intake = IntakeRecord::new(source, subject);
        if let Some(parsed) = &email {
            intake.sender_email = parsed.meta.from_email.clone();
            intake.sender_name = parsed.meta.from_name.clone();
        }
        self.repo
            .create_intake(&intake)
            .await
            .with_context(|| format!("Failed to create intake for {}", filename))?;

        let (parent, _) = self.store(&intake.id, filename, bytes, kind, None).await?;
        if let Some(parsed) = &email {
            self.store_attachments(&intake.id, parent.id, parsed).await?;
        }

        info!("Created intake {} from {} ({})", intake.id, filename, kind);
        Ok(intake)
    }

    /// Add a file to an existing intake; identical content is not added twice
    pub async fn attach_file(&self, intake_id: &str, filename: &str, bytes: &[u8]) -> Result<(IntakeFileRecord, bool)> {
        if self.repo.get_intake(intake_id).await?.is_none() {
            return Err(anyhow!("Intake {} not found", intake_id));
        }
        let kind = FileManager::detect_file_kind(filename, bytes);
        self.store(intake_id, filename, bytes, kind, None).await
    }

    async fn store_attachments(&self, intake_id: &str, parent_id: i64, email: &ParsedEmail) -> Result<()> {
        for attachment in &email.attachments {
            let kind = FileManager::detect_file_kind(&attachment.filename, &attachment.bytes);
            let (_, inserted) = self
                .store(intake_id, &attachment.filename, &attachment.bytes, kind, Some(parent_id))
                .await?;
            if !inserted {
                debug!("Attachment {} duplicates a stored file", attachment.filename);
            }
        }
        Ok(())
    }

    async fn store(
        &self,
        intake_id: &str,
        filename: &str,
        bytes: &[u8],
        kind: FileKind,
        parent_id: Option<i64>,
    ) -> Result<(IntakeFileRecord, bool)> {
        let (path, sha) = FileManager::store_file(&self.files_dir, filename, bytes)?;
        let mut record = IntakeFileRecord::new(
            intake_id.to_string(),
            filename.to_string(),
            path.to_string_lossy().to_string(),
            FileManager::guess_mime(filename),
            kind,
            bytes.len() as i64,
            sha,
        );
        if let Some(parent) = parent_id {
            record = record.with_parent(parent);
        }
        self.repo.add_intake_file(&record).await
    }
}
