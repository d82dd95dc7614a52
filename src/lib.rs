/*!
 * # robaws-intake
 *
 * Turns freight inquiries (emails, PDFs, photos) into Robaws quotations.
 *
 * ## Features
 *
 * - Ingest `.eml` files, PDFs, images and plain text, including email attachments
 * - Extract contact, vehicle and route data:
 *   - Regex patterns (always)
 *   - LLM providers (OpenAI, Anthropic), with vision for scans and photos
 * - Resolve the Robaws client by email, phone or fuzzy company name
 * - Create or update the Robaws offer and upload source documents once
 * - SQLite-backed queue with retries and a polling worker
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `ingest`: Files and emails to intakes
 * - `document`: Text and images from stored files
 * - `extraction`: Pattern and LLM extraction, merged into `ExtractionData`
 * - `providers`: LLM provider clients
 * - `robaws`: Robaws REST client
 * - `resolver`: Client resolution
 * - `export`: Offer mapping and the export job
 * - `database`: SQLite storage
 * - `app_controller`: Pipeline orchestration
 * - `worker`: Queue processing
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod document;
pub mod errors;
pub mod export;
pub mod extraction;
pub mod file_utils;
pub mod ingest;
pub mod providers;
pub mod resolver;
pub mod retry;
pub mod robaws;
pub mod worker;

// Re-export main types for easier usage
pub use app_config::Config;
pub use app_controller::{Controller, IntakeDetails, RunSummary};
pub use database::models::{IntakeRecord, IntakeStatus};
pub use errors::{AppError, ExportError, ExtractionError, ProviderError, RobawsError};
pub use extraction::ExtractionData;
pub use resolver::{ContactHint, Resolution};
pub use worker::Worker;
