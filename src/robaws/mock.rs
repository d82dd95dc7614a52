/*!
 * In-memory Robaws for tests and dry runs.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use super::models::{
    NewClient, NewContact, OfferPayload, Page, RobawsClient, RobawsContact, RobawsDocument, RobawsOffer,
};
use super::RobawsApi;
use crate::errors::RobawsError;

/// Upload received by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct MockUpload {
    pub offer_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Default)]
struct State {
    clients: Vec<RobawsClient>,
    offers: Vec<(RobawsOffer, OfferPayload)>,
    uploads: Vec<MockUpload>,
    next_id: i64,
    list_calls: usize,
    created_clients: usize,
    offer_failures: usize,
    upload_failures: usize,
    lookup_failures: Vec<RobawsError>,
    latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared in-memory Robaws; clones see the same state
#[derive(Debug, Clone)]
pub struct MockRobaws {
    state: Arc<Mutex<State>>,
}

impl Default for MockRobaws {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRobaws {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                next_id: 1000,
                ..State::default()
            })),
        }
    }

    /// Seed with clients; their ids are kept as given
    pub fn with_clients(clients: Vec<RobawsClient>) -> Self {
        let mock = Self::new();
        mock.state.lock().clients = clients;
        mock
    }

    pub fn add_client(&self, client: RobawsClient) {
        self.state.lock().clients.push(client);
    }

    /// The next `n` offer create/update calls fail with a 503
    pub fn fail_next_offer_requests(&self, n: usize) {
        self.state.lock().offer_failures = n;
    }

    /// The next `n` uploads fail with a 503
    pub fn fail_next_uploads(&self, n: usize) {
        self.state.lock().upload_failures = n;
    }

    /// The next client and contact lookups fail with these errors, in order
    pub fn fail_next_lookups(&self, errors: Vec<RobawsError>) {
        self.state.lock().lookup_failures = errors;
    }

    /// Every call sleeps this long before answering
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Highest number of calls that were in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Offers with the payload last sent for each
    pub fn offers(&self) -> Vec<(RobawsOffer, OfferPayload)> {
        self.state.lock().offers.clone()
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state.lock().uploads.clone()
    }

    /// Number of `list_clients` calls so far
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Number of clients created through the API
    pub fn created_clients(&self) -> usize {
        self.state.lock().created_clients
    }

    pub fn clients(&self) -> Vec<RobawsClient> {
        self.state.lock().clients.clone()
    }
}

impl MockRobaws {
    async fn delay(&self) {
        let latency = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().in_flight -= 1;
    }

    fn next_lookup_failure(&self) -> Result<(), RobawsError> {
        let mut state = self.state.lock();
        if state.lookup_failures.is_empty() {
            Ok(())
        } else {
            Err(state.lookup_failures.remove(0))
        }
    }
}

fn unavailable() -> RobawsError {
    RobawsError::Http {
        status: 503,
        body: "mock outage".to_string(),
    }
}

fn same_email(candidate: Option<&String>, email: &str) -> bool {
    candidate.is_some_and(|c| c.trim().eq_ignore_ascii_case(email.trim()))
}

#[async_trait]
impl RobawsApi for MockRobaws {
    async fn list_clients(&self, page: u32, size: u32) -> Result<Page<RobawsClient>, RobawsError> {
        self.delay().await;
        self.next_lookup_failure()?;
        let mut state = self.state.lock();
        state.list_calls += 1;
        let mut sorted = state.clients.clone();
        sorted.sort_by_key(|c| c.id);
        let items = sorted
            .into_iter()
            .skip((page * size) as usize)
            .take(size as usize)
            .collect();
        Ok(Page {
            items,
            page,
            size,
            total_items: Some(state.clients.len() as u64),
        })
    }

    async fn search_clients_by_email(&self, email: &str) -> Result<Vec<RobawsClient>, RobawsError> {
        self.delay().await;
        self.next_lookup_failure()?;
        let state = self.state.lock();
        Ok(state
            .clients
            .iter()
            .filter(|c| same_email(c.email.as_ref(), email))
            .cloned()
            .collect())
    }

    async fn search_contacts_by_email(&self, email: &str) -> Result<Vec<RobawsContact>, RobawsError> {
        self.delay().await;
        self.next_lookup_failure()?;
        let state = self.state.lock();
        Ok(state
            .clients
            .iter()
            .flat_map(|c| c.contacts.iter())
            .filter(|contact| same_email(contact.email.as_ref(), email))
            .cloned()
            .collect())
    }

    async fn get_client(&self, id: i64) -> Result<RobawsClient, RobawsError> {
        self.delay().await;
        self.next_lookup_failure()?;
        let state = self.state.lock();
        state
            .clients
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RobawsError::NotFound(format!("client {}", id)))
    }

    async fn create_client(&self, client: &NewClient) -> Result<RobawsClient, RobawsError> {
        self.delay().await;
        let mut state = self.state.lock();
        let created = RobawsClient {
            id: state.next_id(),
            name: client.name.clone(),
            email: client.email.clone(),
            tel: client.tel.clone(),
            ..RobawsClient::default()
        };
        state.created_clients += 1;
        state.clients.push(created.clone());
        Ok(created)
    }

    async fn create_contact(&self, client_id: i64, contact: &NewContact) -> Result<RobawsContact, RobawsError> {
        self.delay().await;
        let mut state = self.state.lock();
        let id = state.next_id();
        let client = state
            .clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| RobawsError::NotFound(format!("client {}", client_id)))?;
        let created = RobawsContact {
            id,
            client_id: Some(client_id),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            email: contact.email.clone(),
            tel: contact.tel.clone(),
            gsm: None,
        };
        client.contacts.push(created.clone());
        Ok(created)
    }

    async fn create_offer(&self, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.offer_failures > 0 {
            state.offer_failures -= 1;
            return Err(unavailable());
        }
        let id = state.next_id();
        let offer = RobawsOffer {
            id,
            client_id: Some(payload.client_id),
            title: Some(payload.title.clone()),
            logic_id: Some(format!("O{}", id)),
        };
        state.offers.push((offer.clone(), payload.clone()));
        Ok(offer)
    }

    async fn update_offer(&self, id: i64, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.offer_failures > 0 {
            state.offer_failures -= 1;
            return Err(unavailable());
        }
        let (offer, stored) = state
            .offers
            .iter_mut()
            .find(|(o, _)| o.id == id)
            .ok_or_else(|| RobawsError::NotFound(format!("offer {}", id)))?;
        offer.title = Some(payload.title.clone());
        offer.client_id = Some(payload.client_id);
        *stored = payload.clone();
        Ok(offer.clone())
    }

    async fn get_offer(&self, id: i64) -> Result<RobawsOffer, RobawsError> {
        self.delay().await;
        let state = self.state.lock();
        state
            .offers
            .iter()
            .find(|(o, _)| o.id == id)
            .map(|(o, _)| o.clone())
            .ok_or_else(|| RobawsError::NotFound(format!("offer {}", id)))
    }

    async fn upload_offer_document(
        &self,
        offer_id: i64,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RobawsDocument, RobawsError> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            return Err(unavailable());
        }
        if !state.offers.iter().any(|(o, _)| o.id == offer_id) {
            return Err(RobawsError::NotFound(format!("offer {}", offer_id)));
        }
        let id = state.next_id();
        state.uploads.push(MockUpload {
            offer_id,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len(),
        });
        Ok(RobawsDocument {
            id,
            name: Some(filename.to_string()),
        })
    }
}
