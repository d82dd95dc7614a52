/*!
 * Tests for file storage and detection helpers
 */

use robaws_intake::database::models::IntakeSource;
use robaws_intake::database::Repository;
use robaws_intake::file_utils::{FileKind, FileManager};
use robaws_intake::ingest::Ingestor;

use crate::common::{create_temp_dir, create_test_file, email_with_attachment, text_pdf};

#[test]
fn test_findIntakeFiles_shouldWalkSortedAndSkipHidden() {
    let dir = create_temp_dir().unwrap();
    create_test_file(dir.path(), "b.eml", b"From: a@b.com\nSubject: x\n\nhi").unwrap();
    create_test_file(dir.path(), "a.txt", b"hello").unwrap();
    create_test_file(dir.path(), "nested/c.pdf", &text_pdf(&["Lagos"])).unwrap();
    create_test_file(dir.path(), ".DS_Store", b"junk").unwrap();

    let files = FileManager::find_intake_files(dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();

    assert_eq!(names, vec!["a.txt", "b.eml", "c.pdf"]);
}

#[test]
fn test_detectFileKind_longTextCutMidCharacter_shouldStayText() {
    // 4095 ASCII bytes then a two-byte character straddling the sniff window
    let mut bytes = vec![b'a'; 4095];
    bytes.extend_from_slice("é and more".as_bytes());

    assert_eq!(FileManager::detect_file_kind("upload", &bytes), FileKind::Text);
}

#[test]
fn test_detectFileKind_generatedPdfWithoutExtension_shouldBePdf() {
    let pdf = text_pdf(&["POL: Antwerp"]);
    assert_eq!(FileManager::detect_file_kind("attachment-1", &pdf), FileKind::Pdf);
    assert_eq!(FileManager::guess_mime("attachment-1.pdf"), "application/pdf");
}

#[test]
fn test_ingestBytes_emailWithAttachment_shouldStoreChildFileByHash() {
    let dir = create_temp_dir().unwrap();
    let pdf = text_pdf(&["Weight: 1800 kg"]);
    let email = email_with_attachment(
        "buyer@example.com",
        "Quote",
        "See attached.",
        ("car.pdf", "application/pdf", &pdf),
    );
    let repo = Repository::new_in_memory().unwrap();
    let ingestor = Ingestor::new(repo.clone(), dir.path().join("files"));

    let files = tokio_test::block_on(async {
        let intake = ingestor
            .ingest_bytes("quote.eml", &email, IntakeSource::Email)
            .await
            .unwrap();
        repo.get_intake_files(&intake.id).await.unwrap()
    });

    assert_eq!(files.len(), 2);
    let attachment = files.iter().find(|f| f.filename == "car.pdf").unwrap();
    assert_eq!(attachment.kind, FileKind::Pdf);
    assert!(attachment.parent_file_id.is_some());
    assert_eq!(attachment.sha256, FileManager::sha256_hex(&pdf));
    assert!(attachment.storage_path.contains(&attachment.sha256));
}
