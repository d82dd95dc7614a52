/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for all database operations,
 * abstracting away the SQL details and providing type-safe access.
 */

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use super::connection::{DatabaseConnection, DatabaseStats};
use super::models::{
    now_timestamp, ExtractionMethod, ExtractionRecord, IntakeFileRecord, IntakeRecord,
    IntakeSource, IntakeStatus, QuotationRecord, UploadRecord,
};
use crate::file_utils::FileKind;

const INTAKE_COLUMNS: &str = "id, source, status, subject, sender_email, sender_name, customer_name, \
     contact_email, contact_phone, robaws_client_id, robaws_contact_id, robaws_offer_id, attempts, \
     last_error, next_attempt_at, created_at, updated_at, exported_at";

const FILE_COLUMNS: &str = "id, intake_id, parent_file_id, filename, storage_path, mime_type, kind, \
     size_bytes, sha256, created_at";

fn parse_intake_row(row: &rusqlite::Row) -> rusqlite::Result<IntakeRecord> {
    Ok(IntakeRecord {
        id: row.get(0)?,
        source: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or(IntakeSource::Upload),
        status: row
            .get::<_, String>(2)?
            .parse()
            .unwrap_or(IntakeStatus::Pending),
        subject: row.get(3)?,
        sender_email: row.get(4)?,
        sender_name: row.get(5)?,
        customer_name: row.get(6)?,
        contact_email: row.get(7)?,
        contact_phone: row.get(8)?,
        robaws_client_id: row.get(9)?,
        robaws_contact_id: row.get(10)?,
        robaws_offer_id: row.get(11)?,
        attempts: row.get(12)?,
        last_error: row.get(13)?,
        next_attempt_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        exported_at: row.get(17)?,
    })
}

fn parse_file_row(row: &rusqlite::Row) -> rusqlite::Result<IntakeFileRecord> {
    Ok(IntakeFileRecord {
        id: row.get(0)?,
        intake_id: row.get(1)?,
        parent_file_id: row.get(2)?,
        filename: row.get(3)?,
        storage_path: row.get(4)?,
        mime_type: row.get(5)?,
        kind: row.get::<_, String>(6)?.parse().unwrap_or(FileKind::Other),
        size_bytes: row.get(7)?,
        sha256: row.get(8)?,
        created_at: row.get(9)?,
    })
}

/// Repository for database operations
#[derive(Debug, Clone)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Row counts per table and per intake status
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.stats())
            .await
            .context("Database stats task panicked")?
    }

    // =========================================================================
    // Intake Operations
    // =========================================================================

    /// Insert a new intake
    pub async fn create_intake(&self, intake: &IntakeRecord) -> Result<()> {
        let intake = intake.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO intakes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                        INTAKE_COLUMNS
                    ),
                    params![
                        intake.id,
                        intake.source.to_string(),
                        intake.status.to_string(),
                        intake.subject,
                        intake.sender_email,
                        intake.sender_name,
                        intake.customer_name,
                        intake.contact_email,
                        intake.contact_phone,
                        intake.robaws_client_id,
                        intake.robaws_contact_id,
                        intake.robaws_offer_id,
                        intake.attempts,
                        intake.last_error,
                        intake.next_attempt_at,
                        intake.created_at,
                        intake.updated_at,
                        intake.exported_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Get an intake by ID
    pub async fn get_intake(&self, intake_id: &str) -> Result<Option<IntakeRecord>> {
        let intake_id = intake_id.to_string();

        self.db
            .execute_async(move |conn| Self::get_intake_sync(conn, &intake_id))
            .await
    }

    /// Get an intake by ID (synchronous version for use within transactions)
    fn get_intake_sync(conn: &Connection, intake_id: &str) -> Result<Option<IntakeRecord>> {
        let result = conn
            .query_row(
                &format!("SELECT {} FROM intakes WHERE id = ?1", INTAKE_COLUMNS),
                [intake_id],
                parse_intake_row,
            )
            .optional()?;

        Ok(result)
    }

    /// List intakes, newest first, with optional status filter
    pub async fn list_intakes(
        &self,
        status_filter: Option<IntakeStatus>,
        limit: usize,
    ) -> Result<Vec<IntakeRecord>> {
        self.db
            .execute_async(move |conn| {
                let limit = limit as i64;
                let intakes: Vec<IntakeRecord> = if let Some(status) = status_filter {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM intakes WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
                        INTAKE_COLUMNS
                    ))?;
                    stmt.query_map(params![status.to_string(), limit], parse_intake_row)?
                        .filter_map(|r| r.ok())
                        .collect()
                } else {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM intakes ORDER BY created_at DESC LIMIT ?1",
                        INTAKE_COLUMNS
                    ))?;
                    stmt.query_map([limit], parse_intake_row)?
                        .filter_map(|r| r.ok())
                        .collect()
                };

                Ok(intakes)
            })
            .await
    }

    /// Update intake status and the last error message
    pub async fn update_intake_status(
        &self,
        intake_id: &str,
        status: IntakeStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let exported_at = if status == IntakeStatus::Exported {
                    Some(now.clone())
                } else {
                    None
                };

                conn.execute(
                    r#"
                    UPDATE intakes
                    SET status = ?1, last_error = ?2, updated_at = ?3,
                        exported_at = COALESCE(?4, exported_at)
                    WHERE id = ?5
                    "#,
                    params![status.to_string(), last_error, now, exported_at, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Copy extracted customer/contact fields onto the intake
    pub async fn update_intake_contact(
        &self,
        intake_id: &str,
        customer_name: Option<String>,
        contact_email: Option<String>,
        contact_phone: Option<String>,
    ) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE intakes
                    SET customer_name = ?1, contact_email = ?2, contact_phone = ?3, updated_at = ?4
                    WHERE id = ?5
                    "#,
                    params![customer_name, contact_email, contact_phone, now, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Store the resolved Robaws client and contact
    pub async fn set_intake_client(
        &self,
        intake_id: &str,
        client_id: i64,
        contact_id: Option<i64>,
    ) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE intakes
                    SET robaws_client_id = ?1, robaws_contact_id = ?2, updated_at = ?3
                    WHERE id = ?4
                    "#,
                    params![client_id, contact_id, now, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Store the Robaws offer created for the intake
    pub async fn set_intake_offer(&self, intake_id: &str, offer_id: i64) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE intakes SET robaws_offer_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![offer_id, now, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Move to `exporting` and count the attempt; returns the new attempt number
    pub async fn begin_export_attempt(&self, intake_id: &str) -> Result<i64> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    r#"
                    UPDATE intakes
                    SET status = 'exporting', attempts = attempts + 1, updated_at = ?1
                    WHERE id = ?2
                    "#,
                    params![now, intake_id],
                )?;
                let attempts: i64 = tx.query_row(
                    "SELECT attempts FROM intakes WHERE id = ?1",
                    [&intake_id],
                    |row| row.get(0),
                )?;
                Ok(attempts)
            })
            .await
    }

    /// Count one more failed attempt without changing the status; returns the total
    pub async fn count_failed_attempt(&self, intake_id: &str) -> Result<i64> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                tx.execute(
                    "UPDATE intakes SET attempts = attempts + 1, updated_at = ?1 WHERE id = ?2",
                    params![now, intake_id],
                )?;
                let attempts: i64 = tx.query_row(
                    "SELECT attempts FROM intakes WHERE id = ?1",
                    [&intake_id],
                    |row| row.get(0),
                )?;
                Ok(attempts)
            })
            .await
    }

    /// Record a failed attempt: status, error and the earliest next try
    pub async fn schedule_retry(
        &self,
        intake_id: &str,
        status: IntakeStatus,
        error: String,
        next_attempt_at: Option<String>,
    ) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE intakes
                    SET status = ?1, last_error = ?2, next_attempt_at = ?3, updated_at = ?4
                    WHERE id = ?5
                    "#,
                    params![status.to_string(), error, next_attempt_at, now, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Reset retry bookkeeping and put the intake back in the given status
    pub async fn requeue_intake(&self, intake_id: &str, status: IntakeStatus) -> Result<()> {
        let intake_id = intake_id.to_string();
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE intakes
                    SET status = ?1, attempts = 0, last_error = NULL, next_attempt_at = NULL, updated_at = ?2
                    WHERE id = ?3
                    "#,
                    params![status.to_string(), now, intake_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Claim runnable intakes whose retry time has come
    ///
    /// Claimed rows are switched to `processing` inside one transaction so two
    /// workers never pick the same intake. The returned records carry the
    /// status they had before the claim.
    pub async fn claim_due_intakes(&self, limit: usize) -> Result<Vec<IntakeRecord>> {
        let now = now_timestamp();

        self.db
            .transaction_async(move |tx| {
                let claimed: Vec<IntakeRecord> = {
                    let mut stmt = tx.prepare(&format!(
                        r#"
                        SELECT {} FROM intakes
                        WHERE status IN ('pending', 'extracted', 'ready', 'export_failed')
                          AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                        ORDER BY created_at
                        LIMIT ?2
                        "#,
                        INTAKE_COLUMNS
                    ))?;
                    let rows = stmt.query_map(params![now, limit as i64], parse_intake_row)?;
                    rows.filter_map(|r| r.ok()).collect()
                };

                for intake in &claimed {
                    tx.execute(
                        "UPDATE intakes SET status = 'processing', updated_at = ?1 WHERE id = ?2",
                        params![now, intake.id],
                    )?;
                }

                if !claimed.is_empty() {
                    debug!("Claimed {} intake(s)", claimed.len());
                }
                Ok(claimed)
            })
            .await
    }

    /// Return intakes stuck in `processing`/`exporting` since before `cutoff` to `pending`
    pub async fn release_stale_claims(&self, cutoff: String) -> Result<usize> {
        let now = now_timestamp();

        self.db
            .execute_async(move |conn| {
                let released = conn.execute(
                    r#"
                    UPDATE intakes
                    SET status = CASE
                            WHEN robaws_client_id IS NOT NULL THEN 'ready'
                            ELSE 'pending'
                        END,
                        updated_at = ?1
                    WHERE status IN ('processing', 'exporting') AND updated_at < ?2
                    "#,
                    params![now, cutoff],
                )?;
                Ok(released)
            })
            .await
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    /// Attach a stored file to an intake
    ///
    /// Returns the stored row and whether it was newly inserted. Identical
    /// content already attached to the same intake is left untouched.
    pub async fn add_intake_file(&self, file: &IntakeFileRecord) -> Result<(IntakeFileRecord, bool)> {
        let file = file.clone();

        self.db
            .execute_async(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT OR IGNORE INTO intake_files
                        (intake_id, parent_file_id, filename, storage_path, mime_type, kind, size_bytes, sha256, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        file.intake_id,
                        file.parent_file_id,
                        file.filename,
                        file.storage_path,
                        file.mime_type,
                        file.kind.to_string(),
                        file.size_bytes,
                        file.sha256,
                        file.created_at,
                    ],
                )? > 0;

                let stored = conn.query_row(
                    &format!(
                        "SELECT {} FROM intake_files WHERE intake_id = ?1 AND sha256 = ?2",
                        FILE_COLUMNS
                    ),
                    params![file.intake_id, file.sha256],
                    parse_file_row,
                )?;

                Ok((stored, inserted))
            })
            .await
    }

    /// All files of an intake in insertion order
    pub async fn get_intake_files(&self, intake_id: &str) -> Result<Vec<IntakeFileRecord>> {
        let intake_id = intake_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM intake_files WHERE intake_id = ?1 ORDER BY id",
                    FILE_COLUMNS
                ))?;
                let files = stmt
                    .query_map([&intake_id], parse_file_row)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(files)
            })
            .await
    }

    // =========================================================================
    // Extraction Operations
    // =========================================================================

    /// Insert or replace the extraction of an intake
    pub async fn upsert_extraction(&self, record: &ExtractionRecord) -> Result<()> {
        let record = record.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO extractions (intake_id, method, provider, model, confidence, data, raw_response, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(intake_id) DO UPDATE SET
                        method = excluded.method,
                        provider = excluded.provider,
                        model = excluded.model,
                        confidence = excluded.confidence,
                        data = excluded.data,
                        raw_response = excluded.raw_response,
                        created_at = excluded.created_at
                    "#,
                    params![
                        record.intake_id,
                        record.method.to_string(),
                        record.provider,
                        record.model,
                        record.confidence,
                        record.data,
                        record.raw_response,
                        record.created_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Get the extraction of an intake
    pub async fn get_extraction(&self, intake_id: &str) -> Result<Option<ExtractionRecord>> {
        let intake_id = intake_id.to_string();

        self.db
            .execute_async(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, intake_id, method, provider, model, confidence, data, raw_response, created_at
                        FROM extractions WHERE intake_id = ?1
                        "#,
                        [&intake_id],
                        |row| {
                            Ok(ExtractionRecord {
                                id: row.get(0)?,
                                intake_id: row.get(1)?,
                                method: row
                                    .get::<_, String>(2)?
                                    .parse()
                                    .unwrap_or(ExtractionMethod::Pattern),
                                provider: row.get(3)?,
                                model: row.get(4)?,
                                confidence: row.get(5)?,
                                data: row.get(6)?,
                                raw_response: row.get(7)?,
                                created_at: row.get(8)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(result)
            })
            .await
    }

    // =========================================================================
    // Quotation Operations
    // =========================================================================

    /// Insert or update the local offer mirror of an intake
    pub async fn upsert_quotation(&self, record: &QuotationRecord) -> Result<()> {
        let record = record.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO quotations
                        (intake_id, robaws_offer_id, client_id, contact_id, title, payload, status, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(intake_id) DO UPDATE SET
                        robaws_offer_id = excluded.robaws_offer_id,
                        client_id = excluded.client_id,
                        contact_id = excluded.contact_id,
                        title = excluded.title,
                        payload = excluded.payload,
                        status = excluded.status,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        record.intake_id,
                        record.robaws_offer_id,
                        record.client_id,
                        record.contact_id,
                        record.title,
                        record.payload,
                        record.status,
                        record.created_at,
                        record.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Get the offer mirror of an intake
    pub async fn get_quotation(&self, intake_id: &str) -> Result<Option<QuotationRecord>> {
        let intake_id = intake_id.to_string();

        self.db
            .execute_async(move |conn| {
                let result = conn
                    .query_row(
                        r#"
                        SELECT id, intake_id, robaws_offer_id, client_id, contact_id, title, payload, status, created_at, updated_at
                        FROM quotations WHERE intake_id = ?1
                        "#,
                        [&intake_id],
                        |row| {
                            Ok(QuotationRecord {
                                id: row.get(0)?,
                                intake_id: row.get(1)?,
                                robaws_offer_id: row.get(2)?,
                                client_id: row.get(3)?,
                                contact_id: row.get(4)?,
                                title: row.get(5)?,
                                payload: row.get(6)?,
                                status: row.get(7)?,
                                created_at: row.get(8)?,
                                updated_at: row.get(9)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(result)
            })
            .await
    }

    // =========================================================================
    // Upload Ledger Operations
    // =========================================================================

    /// Whether content with this hash was already uploaded to the offer
    pub async fn is_uploaded(&self, offer_id: i64, sha256: &str) -> Result<bool> {
        let sha256 = sha256.to_string();

        self.db
            .execute_async(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM robaws_uploads WHERE robaws_offer_id = ?1 AND sha256 = ?2",
                    params![offer_id, sha256],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    /// Record an upload; returns false when the ledger already had it
    pub async fn record_upload(&self, record: &UploadRecord) -> Result<bool> {
        let record = record.clone();

        self.db
            .execute_async(move |conn| {
                let inserted = conn.execute(
                    r#"
                    INSERT OR IGNORE INTO robaws_uploads
                        (robaws_offer_id, sha256, intake_file_id, robaws_document_id, filename, uploaded_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        record.robaws_offer_id,
                        record.sha256,
                        record.intake_file_id,
                        record.robaws_document_id,
                        record.filename,
                        record.uploaded_at,
                    ],
                )?;
                Ok(inserted > 0)
            })
            .await
    }

    /// Ledger entries of an offer
    pub async fn list_uploads(&self, offer_id: i64) -> Result<Vec<UploadRecord>> {
        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT robaws_offer_id, sha256, intake_file_id, robaws_document_id, filename, uploaded_at
                    FROM robaws_uploads WHERE robaws_offer_id = ?1 ORDER BY id
                    "#,
                )?;
                let uploads = stmt
                    .query_map([offer_id], |row| {
                        Ok(UploadRecord {
                            robaws_offer_id: row.get(0)?,
                            sha256: row.get(1)?,
                            intake_file_id: row.get(2)?,
                            robaws_document_id: row.get(3)?,
                            filename: row.get(4)?,
                            uploaded_at: row.get(5)?,
                        })
                    })?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok(uploads)
            })
            .await
    }
}
