/*!
 * Full pipeline against a fake Robaws HTTP server
 */

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{basic_auth, body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use robaws_intake::database::models::IntakeSource;
use robaws_intake::robaws::HttpRobawsClient;
use robaws_intake::{Controller, IntakeStatus};

use crate::common::{controller_with, create_temp_dir, test_config, INQUIRY_TEXT};

fn http_controller(server: &MockServer, dir: &std::path::Path) -> Controller {
    let mut config = test_config(dir);
    config.robaws.base_url = server.uri();
    config.robaws.retry_count = 1;
    let api = HttpRobawsClient::new(&config.robaws).unwrap();
    controller_with(config, Arc::new(api), None).unwrap()
}

#[tokio::test]
async fn test_pipeline_overHttp_shouldCreateOfferForContactClient() {
    let server = MockServer::start().await;
    let dir = create_temp_dir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v2/contacts"))
        .and(query_param("email", "jan@acme-trading.be"))
        .and(basic_auth("api", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": 501, "clientId": 12, "firstName": "Jan", "surname": "Peeters", "email": "jan@acme-trading.be"}],
            "totalItems": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/clients/12"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 12, "name": "Acme Trading"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/offers"))
        .and(body_partial_json(json!({
            "clientId": 12,
            "contactId": 501,
            "extraFields": {"POL": {"stringValue": "Antwerp"}, "POD": {"stringValue": "Lagos"}}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9001, "logicId": "O2024-17"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/offers/9001/documents"))
        .and(header_exists("content-type"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 77, "name": "inquiry.txt"})))
        .expect(1)
        .mount(&server)
        .await;

    let controller = http_controller(&server, dir.path());
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Exported);
    let details = controller.show(&intake.id).await.unwrap();
    assert_eq!(details.intake.robaws_client_id, Some(12));
    assert_eq!(details.intake.robaws_offer_id, Some(9001));
    let quotation = details.quotation.unwrap();
    assert_eq!(quotation.contact_id, Some(501));
    assert_eq!(quotation.status, "created");
}

#[tokio::test]
async fn test_pipeline_badCredentials_shouldFailWithoutRetry() {
    let server = MockServer::start().await;
    let dir = create_temp_dir().unwrap();

    // 401 is not transient, so the client gives up after one call
    Mock::given(method("GET"))
        .and(path("/api/v2/contacts"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let controller = http_controller(&server, dir.path());
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Failed);
    let record = controller.show(&intake.id).await.unwrap().intake;
    assert!(record.next_attempt_at.is_none());
    assert!(record.last_error.unwrap().contains("invalid credentials"));
}

#[tokio::test]
async fn test_pipeline_robawsDown_shouldKeepIntakeForRetry() {
    let server = MockServer::start().await;
    let dir = create_temp_dir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v2/contacts"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let controller = http_controller(&server, dir.path());
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Extracted);
    let record = controller.show(&intake.id).await.unwrap().intake;
    assert_eq!(record.attempts, 1);
    assert!(record.next_attempt_at.is_some());
    assert!(record.last_error.unwrap().contains("502"));
}

#[tokio::test]
async fn test_pipeline_unknownSender_shouldScanClientPagesByPhone() {
    let server = MockServer::start().await;
    let dir = create_temp_dir().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v2/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "totalItems": 0})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/clients"))
        .and(query_param("email", "jan@acme-trading.be"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "totalItems": 0})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/clients"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": 40, "name": "Acme Trading", "tel": "0470/12.34.56"}],
            "page": 0, "size": 100, "totalItems": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/offers"))
        .and(body_partial_json(json!({"clientId": 40})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9100})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/offers/9100/documents"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .mount(&server)
        .await;

    let controller = http_controller(&server, dir.path());
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();

    assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Exported);
    assert_eq!(controller.show(&intake.id).await.unwrap().intake.robaws_client_id, Some(40));
}
