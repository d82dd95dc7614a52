/*!
 * Robaws v2 REST integration.
 *
 * `RobawsApi` is the seam between the pipeline and Robaws: the HTTP
 * client talks to the real API, `mock::MockRobaws` keeps everything in
 * memory for tests.
 */

pub mod client;
pub mod mock;
pub mod models;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::RobawsError;

pub use client::HttpRobawsClient;
pub use models::{
    ExtraFieldValue, NewClient, NewContact, OfferPayload, Page, RobawsClient, RobawsContact, RobawsDocument,
    RobawsOffer,
};

/// Operations the pipeline needs from Robaws
#[async_trait]
pub trait RobawsApi: Send + Sync + Debug {
    /// One page of clients, contacts included; `page` starts at 0
    async fn list_clients(&self, page: u32, size: u32) -> Result<Page<RobawsClient>, RobawsError>;

    /// Clients whose own email matches
    async fn search_clients_by_email(&self, email: &str) -> Result<Vec<RobawsClient>, RobawsError>;

    /// Contacts whose email matches
    async fn search_contacts_by_email(&self, email: &str) -> Result<Vec<RobawsContact>, RobawsError>;

    async fn get_client(&self, id: i64) -> Result<RobawsClient, RobawsError>;

    async fn create_client(&self, client: &NewClient) -> Result<RobawsClient, RobawsError>;

    async fn create_contact(&self, client_id: i64, contact: &NewContact) -> Result<RobawsContact, RobawsError>;

    async fn create_offer(&self, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError>;

    async fn update_offer(&self, id: i64, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError>;

    async fn get_offer(&self, id: i64) -> Result<RobawsOffer, RobawsError>;

    /// Attach a file to an offer (multipart upload)
    async fn upload_offer_document(
        &self,
        offer_id: i64,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RobawsDocument, RobawsError>;
}
