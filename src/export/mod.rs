/*!
 * Quotation export: payload mapping and the export job.
 */

pub mod job;
pub mod mapper;

pub use job::{ExportOutcome, Exporter};
pub use mapper::build_offer_payload;
