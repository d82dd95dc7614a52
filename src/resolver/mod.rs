/*!
 * Client resolution against Robaws.
 *
 * An extracted contact is matched to an existing Robaws client by email,
 * phone and company name. Email lookups use the search endpoints; phone
 * and name matching scan the paginated client list.
 *
 * Scores:
 * - email exact: 1.0
 * - phone (trailing digits): 0.9
 * - normalized name exact: 0.85
 * - fuzzy name: similarity x 0.8, when similarity reaches the threshold
 * - company email domain matches the client's email or website: +0.1
 */

pub mod fuzzy;
pub mod normalize;

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::app_config::{ResolverConfig, RobawsConfig};
use crate::errors::RobawsError;
use crate::extraction::ExtractionData;
use crate::robaws::{NewClient, NewContact, RobawsApi, RobawsClient};
use normalize::{company_domain, normalize_email, normalize_name, phone_key, website_domain};

const SCORE_EMAIL: f32 = 1.0;
const SCORE_PHONE: f32 = 0.9;
const SCORE_EXACT_NAME: f32 = 0.85;
const FUZZY_NAME_WEIGHT: f32 = 0.8;
const DOMAIN_BONUS: f32 = 0.1;

/// Scan stops once a candidate scores at least this much
const EARLY_STOP_SCORE: f32 = 0.95;

/// What we know about the customer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactHint {
    pub company: Option<String>,
    /// Person name
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ContactHint {
    pub fn from_extraction(data: &ExtractionData) -> Self {
        Self {
            company: data.contact.company.clone(),
            name: data.contact.name.clone(),
            email: data.contact.email.clone(),
            phone: data.contact.phone.clone(),
        }
    }

    /// Whether there is anything to match on
    pub fn is_empty(&self) -> bool {
        self.match_name().is_none() && self.email_key().is_none() && self.phone_key().is_none()
    }

    fn email_key(&self) -> Option<String> {
        self.email.as_deref().and_then(normalize_email)
    }

    fn phone_key(&self) -> Option<String> {
        self.phone.as_deref().and_then(phone_key)
    }

    /// Company name, or the person name for private customers
    fn match_name(&self) -> Option<String> {
        self.company
            .as_deref()
            .or(self.name.as_deref())
            .map(normalize_name)
            .filter(|n| !n.is_empty())
    }

    fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.email_key().unwrap_or_default(),
            self.phone_key().unwrap_or_default(),
            self.match_name().unwrap_or_default()
        )
    }
}

/// Why a client was picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    Email,
    Phone,
    ExactName,
    FuzzyName,
    /// Client created because nothing matched
    Created,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchReason::Email => "email",
            MatchReason::Phone => "phone",
            MatchReason::ExactName => "exact name",
            MatchReason::FuzzyName => "fuzzy name",
            MatchReason::Created => "created",
        };
        write!(f, "{}", s)
    }
}

/// Resolved client
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub client_id: i64,
    pub contact_id: Option<i64>,
    pub client_name: String,
    pub score: f32,
    pub reason: MatchReason,
}

impl Resolution {
    pub fn created(&self) -> bool {
        self.reason == MatchReason::Created
    }
}

/// Matches contacts to Robaws clients, memoising results
#[derive(Debug)]
pub struct Resolver {
    api: Arc<dyn RobawsApi>,
    config: ResolverConfig,
    page_size: u32,
    max_pages: u32,
    cache: Mutex<HashMap<String, Option<Resolution>>>,
    /// One creation at a time per contact key
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Resolver {
    pub fn new(api: Arc<dyn RobawsApi>, config: ResolverConfig, robaws: &RobawsConfig) -> Self {
        Self {
            api,
            config,
            page_size: robaws.page_size.max(1),
            max_pages: robaws.max_pages.max(1),
            cache: Mutex::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Best matching client, or `None` below `min_confidence`
    pub async fn resolve(&self, hint: &ContactHint) -> Result<Option<Resolution>, RobawsError> {
        if hint.is_empty() {
            return Ok(None);
        }

        let key = hint.cache_key();
        if let Some(cached) = self.cache.lock().get(&key) {
            debug!("Resolver cache hit for {}", key);
            return Ok(cached.clone());
        }

        let result = match self.resolve_by_email(hint).await? {
            Some(found) => Some(found),
            None => self.scan_clients(hint).await?,
        };

        match &result {
            Some(r) => info!(
                "Resolved client {} ({}) by {} with score {:.2}",
                r.client_id, r.client_name, r.reason, r.score
            ),
            None => info!("No Robaws client matched {}", key),
        }

        // A client created meanwhile must not be hidden by this older miss
        let mut cache = self.cache.lock();
        if !matches!(cache.get(&key), Some(Some(_))) {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    /// Resolve, creating the client (and contact) on a miss when allowed
    ///
    /// Concurrent calls for the same contact create at most one client.
    pub async fn resolve_or_create(&self, hint: &ContactHint) -> Result<Option<Resolution>, RobawsError> {
        if let Some(found) = self.resolve(hint).await? {
            return Ok(Some(found));
        }
        if !self.config.create_missing_clients {
            return Ok(None);
        }

        let key = hint.cache_key();
        let lock = self.creation_locks.lock().entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            // Whoever held the lock before us may have created the client already
            let cached = self.cache.lock().get(&key).cloned();
            match cached {
                Some(Some(found)) => Ok(Some(found)),
                Some(None) => self.create_for(hint).await,
                None => match self.resolve(hint).await {
                    Ok(Some(found)) => Ok(Some(found)),
                    Ok(None) => self.create_for(hint).await,
                    Err(e) => Err(e),
                },
            }
        };
        self.creation_locks.lock().remove(&key);
        result
    }

    async fn create_for(&self, hint: &ContactHint) -> Result<Option<Resolution>, RobawsError> {
        let email = hint.email_key();
        let Some(client_name) = hint
            .company
            .clone()
            .or_else(|| hint.name.clone())
            .or_else(|| email.clone())
            .filter(|n| !n.trim().is_empty())
        else {
            return Ok(None);
        };

        let client = self
            .api
            .create_client(&NewClient {
                name: client_name.trim().to_string(),
                email: email.clone(),
                tel: hint.phone.clone(),
            })
            .await?;

        let contact_id = if email.is_some() || hint.phone.is_some() {
            let contact = NewContact::from_full_name(hint.name.as_deref(), email, hint.phone.clone());
            Some(self.api.create_contact(client.id, &contact).await?.id)
        } else {
            None
        };

        info!("Created Robaws client {} ({})", client.id, client.name);
        let resolution = Resolution {
            client_id: client.id,
            contact_id,
            client_name: client.name,
            score: 1.0,
            reason: MatchReason::Created,
        };
        self.cache.lock().insert(hint.cache_key(), Some(resolution.clone()));
        Ok(Some(resolution))
    }

    /// Drop memoised results
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    async fn resolve_by_email(&self, hint: &ContactHint) -> Result<Option<Resolution>, RobawsError> {
        let Some(email) = hint.email_key() else {
            return Ok(None);
        };

        // Contact persons first: they also give us the contact id
        let mut contacts = self.api.search_contacts_by_email(&email).await?;
        contacts.retain(|c| c.client_id.is_some());
        contacts.sort_by_key(|c| (c.client_id, c.id));
        if let Some(contact) = contacts.first() {
            let client_id = contact.client_id.unwrap_or_default();
            let client = self.api.get_client(client_id).await?;
            return Ok(Some(Resolution {
                client_id,
                contact_id: Some(contact.id),
                client_name: client.name,
                score: SCORE_EMAIL,
                reason: MatchReason::Email,
            }));
        }

        let mut clients = self.api.search_clients_by_email(&email).await?;
        clients.sort_by_key(|c| c.id);
        Ok(clients.into_iter().next().map(|client| Resolution {
            client_id: client.id,
            contact_id: contact_with_email(&client, &email),
            client_name: client.name,
            score: SCORE_EMAIL,
            reason: MatchReason::Email,
        }))
    }

    async fn scan_clients(&self, hint: &ContactHint) -> Result<Option<Resolution>, RobawsError> {
        let mut best: Option<Resolution> = None;

        for page in 0..self.max_pages {
            let result = self.api.list_clients(page, self.page_size).await?;
            for client in &result.items {
                let Some(candidate) = self.score(hint, client) else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some(b) => {
                        candidate.score > b.score || (candidate.score == b.score && candidate.client_id < b.client_id)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }

            if best.as_ref().is_some_and(|b| b.score >= EARLY_STOP_SCORE) {
                debug!("Stopping client scan at page {}", page);
                break;
            }
            if !result.has_more(self.page_size) {
                break;
            }
        }

        Ok(best.filter(|b| b.score >= self.config.min_confidence))
    }

    /// Score one client; `None` when nothing matches
    pub fn score(&self, hint: &ContactHint, client: &RobawsClient) -> Option<Resolution> {
        let mut score = 0.0_f32;
        let mut reason = None;
        let mut contact_id = None;

        if let Some(email) = hint.email_key() {
            if client.emails().filter_map(normalize_email).any(|e| e == email) {
                score = SCORE_EMAIL;
                reason = Some(MatchReason::Email);
                contact_id = contact_with_email(client, &email);
            }
        }

        if score < SCORE_PHONE {
            if let Some(phone) = hint.phone_key() {
                if client.phones().filter_map(phone_key).any(|p| p == phone) {
                    score = SCORE_PHONE;
                    reason = Some(MatchReason::Phone);
                }
            }
        }

        if score < SCORE_EXACT_NAME {
            if let Some(name) = hint.match_name() {
                let client_name = normalize_name(&client.name);
                if client_name == name {
                    score = SCORE_EXACT_NAME;
                    reason = Some(MatchReason::ExactName);
                } else {
                    let similarity = fuzzy::similarity(&name, &client_name);
                    let weighted = similarity * FUZZY_NAME_WEIGHT;
                    if similarity >= self.config.name_similarity_threshold && weighted > score {
                        score = weighted;
                        reason = Some(MatchReason::FuzzyName);
                    }
                }
            }
        }

        let reason = reason?;
        if domain_matches(hint, client) {
            score = (score + DOMAIN_BONUS).min(1.0);
        }

        Some(Resolution {
            client_id: client.id,
            contact_id,
            client_name: client.name.clone(),
            score,
            reason,
        })
    }
}

fn contact_with_email(client: &RobawsClient, email: &str) -> Option<i64> {
    client
        .contacts
        .iter()
        .find(|c| c.email.as_deref().and_then(normalize_email).as_deref() == Some(email))
        .map(|c| c.id)
}

fn domain_matches(hint: &ContactHint, client: &RobawsClient) -> bool {
    let Some(domain) = hint.email.as_deref().and_then(company_domain) else {
        return false;
    };
    client
        .emails()
        .filter_map(company_domain)
        .chain(client.website.as_deref().and_then(website_domain))
        .any(|d| d == domain)
}
