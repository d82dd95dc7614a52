/*!
 * Database module for persistent storage of intakes and their exports.
 *
 * This module provides SQLite-based persistence for:
 * - Intakes and their stored source files
 * - Extraction results
 * - Local mirrors of Robaws offers
 * - The document upload ledger (SHA-256 per offer)
 */

pub mod schema;
pub mod connection;
pub mod repository;
pub mod models;

// Re-export main types
pub use connection::{DatabaseConnection, DatabaseStats};
pub use repository::Repository;
