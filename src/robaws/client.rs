use async_trait::async_trait;
use log::{debug, error, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::models::{
    NewClient, NewContact, OfferPayload, Page, RobawsClient, RobawsContact, RobawsDocument, RobawsOffer,
};
use super::RobawsApi;
use crate::app_config::RobawsConfig;
use crate::errors::RobawsError;
use crate::retry::backoff_delay;

/// Longest Retry-After we are willing to honour
const MAX_RETRY_AFTER_SECS: u64 = 120;

/// Error bodies are cut to this length
const MAX_ERROR_BODY: usize = 500;

/// Robaws REST client using basic auth
#[derive(Debug, Clone)]
pub struct HttpRobawsClient {
    /// HTTP client for API requests
    client: Client,
    /// Base URL without trailing slash, e.g. https://app.robaws.com
    base_url: String,
    username: String,
    password: String,
    /// Retries after the first attempt for transient failures
    max_retries: u32,
    /// Base backoff time in milliseconds
    backoff_base_ms: u64,
}

impl HttpRobawsClient {
    /// Create a client from configuration
    pub fn new(config: &RobawsConfig) -> Result<Self, RobawsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("robaws-intake/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RobawsError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            max_retries: config.retry_count,
            backoff_base_ms: config.retry_backoff_ms,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
    }

    /// Send with retries and decode the JSON answer
    ///
    /// `build` is called once per attempt because multipart bodies cannot
    /// be cloned.
    async fn send<T, F>(&self, what: &str, build: F) -> Result<T, RobawsError>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<RequestBuilder, RobawsError>,
    {
        let mut attempt = 0;

        loop {
            let result = match build()?.send().await {
                Ok(response) => Self::decode(what, response).await,
                Err(e) => Err(RobawsError::from(e)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let mut delay = backoff_delay(self.backoff_base_ms, attempt);
                    if let RobawsError::RateLimited {
                        retry_after_secs: Some(secs),
                    } = &e
                    {
                        delay = delay.max(Duration::from_secs((*secs).min(MAX_RETRY_AFTER_SECS)));
                    }
                    warn!(
                        "Robaws {} failed ({}), retry {}/{} in {:?}",
                        what, e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Robaws {} failed: {}", what, e);
                    return Err(e);
                }
            }
        }
    }

    async fn decode<T: DeserializeOwned>(what: &str, response: reqwest::Response) -> Result<T, RobawsError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            debug!("Robaws {} -> {} ({} bytes)", what, status, body.len());
            // Some endpoints answer 201/204 with an empty body
            let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
            return serde_json::from_str(body).map_err(|e| RobawsError::Parse(format!("{}: {}", what, e)));
        }

        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RobawsError::Unauthorized(body),
            StatusCode::NOT_FOUND => RobawsError::NotFound(what.to_string()),
            StatusCode::TOO_MANY_REQUESTS => RobawsError::RateLimited { retry_after_secs },
            _ => RobawsError::Http {
                status: status.as_u16(),
                body,
            },
        })
    }
}

#[async_trait]
impl RobawsApi for HttpRobawsClient {
    async fn list_clients(&self, page: u32, size: u32) -> Result<Page<RobawsClient>, RobawsError> {
        self.send("list clients", || {
            Ok(self
                .request(Method::GET, "clients")
                .query(&[("page", page.to_string()), ("size", size.to_string()), ("include", "contacts".to_string())]))
        })
        .await
    }

    async fn search_clients_by_email(&self, email: &str) -> Result<Vec<RobawsClient>, RobawsError> {
        let page: Page<RobawsClient> = self
            .send("search clients", || {
                Ok(self
                    .request(Method::GET, "clients")
                    .query(&[("email", email), ("include", "contacts")]))
            })
            .await?;
        Ok(page.items)
    }

    async fn search_contacts_by_email(&self, email: &str) -> Result<Vec<RobawsContact>, RobawsError> {
        let page: Page<RobawsContact> = self
            .send("search contacts", || {
                Ok(self.request(Method::GET, "contacts").query(&[("email", email)]))
            })
            .await?;
        Ok(page.items)
    }

    async fn get_client(&self, id: i64) -> Result<RobawsClient, RobawsError> {
        let path = format!("clients/{}", id);
        self.send(&format!("get client {}", id), || {
            Ok(self.request(Method::GET, &path).query(&[("include", "contacts")]))
        })
        .await
    }

    async fn create_client(&self, client: &NewClient) -> Result<RobawsClient, RobawsError> {
        self.send("create client", || Ok(self.request(Method::POST, "clients").json(client)))
            .await
    }

    async fn create_contact(&self, client_id: i64, contact: &NewContact) -> Result<RobawsContact, RobawsError> {
        let path = format!("clients/{}/contacts", client_id);
        self.send("create contact", || Ok(self.request(Method::POST, &path).json(contact)))
            .await
    }

    async fn create_offer(&self, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError> {
        self.send("create offer", || Ok(self.request(Method::POST, "offers").json(payload)))
            .await
    }

    async fn update_offer(&self, id: i64, payload: &OfferPayload) -> Result<RobawsOffer, RobawsError> {
        let path = format!("offers/{}", id);
        let offer: RobawsOffer = self
            .send(&format!("update offer {}", id), || {
                Ok(self.request(Method::PUT, &path).json(payload))
            })
            .await?;
        // PUT may answer without a body
        Ok(if offer.id == 0 { RobawsOffer { id, ..offer } } else { offer })
    }

    async fn get_offer(&self, id: i64) -> Result<RobawsOffer, RobawsError> {
        let path = format!("offers/{}", id);
        self.send(&format!("get offer {}", id), || Ok(self.request(Method::GET, &path)))
            .await
    }

    async fn upload_offer_document(
        &self,
        offer_id: i64,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<RobawsDocument, RobawsError> {
        let path = format!("offers/{}/documents", offer_id);
        self.send(&format!("upload {} to offer {}", filename, offer_id), || {
            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(filename.to_string())
                .mime_str(mime_type)
                .map_err(|e| RobawsError::Request(e.to_string()))?;
            let form = reqwest::multipart::Form::new().part("file", part);
            Ok(self.request(Method::POST, &path).multipart(form))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpRobawsClient {
        HttpRobawsClient::new(&RobawsConfig {
            base_url: server.uri(),
            username: "api".to_string(),
            password: "secret".to_string(),
            retry_count: 2,
            retry_backoff_ms: 1,
            ..RobawsConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_listClients_shouldSendBasicAuthAndPaging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/clients"))
            .and(query_param("page", "2"))
            .and(query_param("size", "50"))
            .and(basic_auth("api", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": 11, "name": "Acme BV"}],
                "page": 2, "size": 50, "totalItems": 101
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).list_clients(2, 50).await.unwrap();
        assert_eq!(page.items[0].name, "Acme BV");
        assert!(!page.has_more(50));
    }

    #[tokio::test]
    async fn test_send_serverError_shouldRetryThenSucceed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/offers/5"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/offers/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 5, "logicId": "O2024-5"})))
            .mount(&server)
            .await;

        let offer = client_for(&server).get_offer(5).await.unwrap();
        assert_eq!(offer.logic_id.as_deref(), Some("O2024-5"));
    }

    #[tokio::test]
    async fn test_send_rateLimited_shouldHonourRetryAfter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/clients/9"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/clients/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 9, "name": "Late Ltd"})))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let client = client_for(&server).get_client(9).await.unwrap();
        assert_eq!(client.name, "Late Ltd");
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_send_unauthorized_shouldNotRetry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/offers"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server).create_offer(&OfferPayload::default()).await;
        assert!(matches!(result, Err(RobawsError::Unauthorized(body)) if body == "bad credentials"));
    }

    #[tokio::test]
    async fn test_send_persistentServerError_shouldGiveUpAfterRetries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/offers/1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(3)
            .mount(&server)
            .await;

        let result = client_for(&server).get_offer(1).await;
        assert!(matches!(result, Err(RobawsError::Http { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_notFound_shouldMapToNotFound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/clients/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client_for(&server).get_client(404).await;
        assert!(matches!(result, Err(RobawsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_updateOffer_emptyBody_shouldKeepId() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v2/offers/77"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let offer = client_for(&server).update_offer(77, &OfferPayload::default()).await.unwrap();
        assert_eq!(offer.id, 77);
    }

    #[tokio::test]
    async fn test_uploadOfferDocument_shouldPostMultipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/offers/3/documents"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 301, "name": "a.pdf"})))
            .expect(1)
            .mount(&server)
            .await;

        let document = client_for(&server)
            .upload_offer_document(3, "a.pdf", "application/pdf", b"%PDF-1.4".to_vec())
            .await
            .unwrap();
        assert_eq!(document.id, 301);

        let requests = server.received_requests().await.unwrap();
        let content_type = requests[0].headers.get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("filename=\"a.pdf\""));
        assert!(body.contains("%PDF-1.4"));
    }
}
