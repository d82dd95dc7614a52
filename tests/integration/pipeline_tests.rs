/*!
 * End-to-end intake processing against mock Robaws and LLM providers
 */

use std::sync::Arc;

use robaws_intake::database::models::IntakeSource;
use robaws_intake::providers::mock::MockProvider;
use robaws_intake::robaws::mock::MockRobaws;
use robaws_intake::robaws::RobawsClient;
use robaws_intake::{ExtractionData, IntakeStatus, Worker};

use crate::common::{
    acme_client, controller_with, create_temp_dir, create_test_file, email_with_attachment, init_test_logging,
    mock_controller, test_config, text_pdf, INQUIRY_TEXT,
};

fn tema_autos() -> RobawsClient {
    RobawsClient {
        id: 31,
        name: "Tema Autos Ltd".to_string(),
        email: Some("kwame@tema-autos.com".to_string()),
        ..RobawsClient::default()
    }
}

fn tema_email() -> Vec<u8> {
    let pdf = text_pdf(&[
        "Vehicle: 2016 Toyota Land Cruiser",
        "VIN: JTEBU3FJ10K123456",
        "Dimensions: 4.95 x 1.98 x 1.89 m",
        "Weight: 2500 kg",
    ]);
    email_with_attachment(
        "Kwame Mensah <kwame@tema-autos.com>",
        "RoRo quote Antwerp - Tema",
        "Hello,\n\nPlease quote the car in the attached sheet from Antwerp to Tema.\n\nBest regards,\nKwame Mensah\n",
        ("vehicle.pdf", "application/pdf", &pdf),
    )
}

#[tokio::test]
async fn test_emailWithPdf_shouldExportOfferWithBothDocuments() {
    init_test_logging();
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client(), tema_autos()]);
    let controller = mock_controller(dir.path(), &mock).unwrap();

    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.eml", &tema_email(), IntakeSource::Email)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Exported);
    let details = controller.show(&intake.id).await.unwrap();
    assert_eq!(details.intake.robaws_client_id, Some(31));
    assert!(details.intake.exported_at.is_some());

    let data: ExtractionData = serde_json::from_str(&details.extraction.unwrap().data).unwrap();
    assert_eq!(data.vehicle.vin.as_deref(), Some("JTEBU3FJ10K123456"));
    assert_eq!(data.vehicle.weight_kg, Some(2500.0));
    assert_eq!(data.shipment.pod.as_deref(), Some("Tema"));
    assert_eq!(data.contact.email.as_deref(), Some("kwame@tema-autos.com"));

    let offers = mock.offers();
    assert_eq!(offers.len(), 1);
    let payload = &offers[0].1;
    assert_eq!(payload.client_id, 31);
    assert_eq!(payload.extra_fields["POD"].string_value, "Tema");
    assert!(payload.extra_fields["CARGO"].string_value.contains("4.95 x 1.98 x 1.89 m"));

    let mut uploaded: Vec<String> = mock.uploads().into_iter().map(|u| u.filename).collect();
    uploaded.sort();
    assert_eq!(uploaded, vec!["inquiry.eml", "vehicle.pdf"]);
}

#[tokio::test]
async fn test_reexport_shouldUpdateOfferWithoutUploadingAgain() {
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client()]);
    let controller = mock_controller(dir.path(), &mock).unwrap();
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::Exported);

    // Same content under another name is still the same document
    controller
        .ingestor()
        .attach_file(&intake.id, "copy-of-inquiry.txt", INQUIRY_TEXT.as_bytes())
        .await
        .unwrap();
    assert_eq!(controller.export(&intake.id).await.unwrap(), IntakeStatus::Exported);

    let details = controller.show(&intake.id).await.unwrap();
    let quotation = details.quotation.unwrap();
    assert_eq!(quotation.status, "updated");
    assert_eq!(mock.offers().len(), 1);
    assert_eq!(mock.uploads().len(), 1);
    assert_eq!(
        controller.repository().list_uploads(quotation.robaws_offer_id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_hybridExtraction_llmShouldFillGapsButNotOverrideEmail() {
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client()]);
    let mut config = test_config(dir.path());
    config.extraction.use_llm = true;
    let provider = Arc::new(MockProvider::answering(
        r#"```json
        {"contact": {"email": "sales@acme-trading.be", "name": "Jan Peeters"},
         "vehicle": {"condition": "used", "description": "Double cab pickup"},
         "shipment": {"pol": "Antwerp", "pod": "Lagos", "destination": "Abuja"},
         "metadata": {"confidence": 0.9}}
        ```"#,
    ));
    let controller = controller_with(config, Arc::new(mock.clone()), Some(provider.clone())).unwrap();
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();

    controller.process_intake(&intake.id).await.unwrap();

    let extraction = controller.show(&intake.id).await.unwrap().extraction.unwrap();
    assert_eq!(extraction.method.to_string(), "hybrid");
    let data: ExtractionData = serde_json::from_str(&extraction.data).unwrap();
    assert_eq!(data.contact.email.as_deref(), Some("jan@acme-trading.be"));
    assert_eq!(data.shipment.destination.as_deref(), Some("Abuja"));
    assert_eq!(data.vehicle.description.as_deref(), Some("Double cab pickup"));

    let request = provider.last_request().unwrap();
    assert!(request.prompt.contains("Antwerp to Lagos"));
    assert!(request.json_mode);
    assert_eq!(mock.offers()[0].1.extra_fields["FDEST"].string_value, "Abuja");
}

#[tokio::test]
async fn test_photoOnlyInquiry_shouldGoThroughVision() {
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![tema_autos()]);
    let mut config = test_config(dir.path());
    config.extraction.use_llm = true;
    let provider = Arc::new(MockProvider::answering(
        r#"{"contact": {"company": "Tema Autos Ltd"},
            "vehicle": {"make": "Nissan", "model": "Patrol", "year": 2015},
            "shipment": {"pol": "Antwerp", "pod": "Tema"}}"#,
    ));
    let controller = controller_with(config, Arc::new(mock.clone()), Some(provider.clone())).unwrap();
    let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    let intake = controller
        .ingestor()
        .ingest_bytes("whatsapp-photo.jpg", &jpeg, IntakeSource::Upload)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Exported);
    let request = provider.last_request().unwrap();
    assert_eq!(request.images.len(), 1);
    assert_eq!(request.images[0].media_type, "image/jpeg");
    assert_eq!(mock.offers()[0].1.title, "Tema Autos Ltd - Antwerp > Tema - 2015 Nissan Patrol");
}

#[tokio::test]
async fn test_llmDown_patternsFound_shouldStillExport() {
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client()]);
    let mut config = test_config(dir.path());
    config.extraction.use_llm = true;
    config.extraction.retry_count = 1;
    let provider = Arc::new(MockProvider::failing());
    let controller = controller_with(config, Arc::new(mock.clone()), Some(provider.clone())).unwrap();

    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();
    let status = controller.process_intake(&intake.id).await.unwrap();

    assert_eq!(status, IntakeStatus::Exported);
    assert!(provider.request_count() >= 1);
    let extraction = controller.show(&intake.id).await.unwrap().extraction.unwrap();
    assert_eq!(extraction.method.to_string(), "pattern");
}

#[tokio::test]
async fn test_robawsOutage_shouldFailAfterMaxAttempts() {
    let dir = create_temp_dir().unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client()]);
    mock.fail_next_offer_requests(10);
    let mut config = test_config(dir.path());
    config.export.max_attempts = 2;
    let controller = controller_with(config, Arc::new(mock.clone()), None).unwrap();
    let intake = controller
        .ingestor()
        .ingest_bytes("inquiry.txt", INQUIRY_TEXT.as_bytes(), IntakeSource::Upload)
        .await
        .unwrap();

    assert_eq!(controller.process_intake(&intake.id).await.unwrap(), IntakeStatus::ExportFailed);
    let first = controller.show(&intake.id).await.unwrap().intake;
    assert_eq!(first.attempts, 1);
    assert!(first.next_attempt_at.is_some());
    assert!(first.last_error.unwrap().contains("503"));

    assert_eq!(controller.export(&intake.id).await.unwrap(), IntakeStatus::Failed);
    assert!(mock.offers().is_empty());
}

#[tokio::test]
async fn test_workerRound_overIngestedFolder_shouldExportEverything() {
    init_test_logging();
    let dir = create_temp_dir().unwrap();
    let inbox = dir.path().join("inbox");
    create_test_file(&inbox, "1-tema.eml", &tema_email()).unwrap();
    create_test_file(&inbox, "2-acme.txt", INQUIRY_TEXT.as_bytes()).unwrap();
    let mock = MockRobaws::with_clients(vec![acme_client(), tema_autos()]);
    let controller = Arc::new(mock_controller(dir.path(), &mock).unwrap());

    let intakes = controller.ingest(&inbox).await.unwrap();
    assert_eq!(intakes.len(), 2);
    assert_eq!(intakes[0].source, IntakeSource::Email);

    let report = Worker::new(controller.clone()).run_once().await.unwrap();

    assert_eq!(report.processed.len(), 2);
    assert_eq!(report.errors, 0);
    let stats = controller.stats().await.unwrap();
    assert_eq!(stats.intake_count, 2);
    assert_eq!(stats.quotation_count, 2);
    assert_eq!(stats.upload_count, 3);
    assert_eq!(
        controller.list(Some(IntakeStatus::Exported), 10).await.unwrap().len(),
        2
    );
}
