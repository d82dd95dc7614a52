/*!
 * Common test utilities for the robaws-intake test suite
 */

use anyhow::Result;
use base64::Engine;
use lopdf::{dictionary, Document, Object, Stream};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use robaws_intake::app_config::Config;
use robaws_intake::database::Repository;
use robaws_intake::providers::Provider;
use robaws_intake::robaws::mock::MockRobaws;
use robaws_intake::robaws::{RobawsApi, RobawsClient};
use robaws_intake::Controller;

/// Plain-text inquiry with a signature, route, vehicle and dimensions
pub const INQUIRY_TEXT: &str = "Hello,

Could you quote RoRo shipping for a used 2018 Toyota Hilux from Antwerp to Lagos?
Dimensions: 5.33 x 1.86 x 1.80 m, weight 2100 kg.
Our ref: PO-7781

Kind regards,
Jan Peeters
Acme Trading BV
Tel: +32 470 12 34 56
jan@acme-trading.be
";

/// Route `log` output to the test harness; `RUST_LOG=debug` shows pipeline stages
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a test file with the given content in the specified directory
pub fn create_test_file(dir: &Path, filename: &str, content: &[u8]) -> Result<PathBuf> {
    let file_path = dir.join(filename);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&file_path, content)?;
    Ok(file_path)
}

/// Config with pattern-only extraction and storage inside `dir`
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.robaws.base_url = "http://robaws.invalid".to_string();
    config.robaws.username = "api".to_string();
    config.robaws.password = "secret".to_string();
    config.robaws.retry_backoff_ms = 1;
    config.extraction.use_llm = false;
    config.extraction.retry_backoff_ms = 1;
    config.extraction.own_domains = vec!["belgaco.be".to_string()];
    config.storage.database_path = Some(dir.join("intake.db"));
    config.storage.files_dir = Some(dir.join("files"));
    config
}

/// Controller over an in-memory database and the given Robaws API
pub fn controller_with(
    config: Config,
    api: Arc<dyn RobawsApi>,
    provider: Option<Arc<dyn Provider>>,
) -> Result<Controller> {
    Controller::with_parts(config, Repository::new_in_memory()?, api, provider)
}

/// Controller backed by a `MockRobaws`
pub fn mock_controller(dir: &Path, mock: &MockRobaws) -> Result<Controller> {
    controller_with(test_config(dir), Arc::new(mock.clone()), None)
}

/// The Robaws client matching `INQUIRY_TEXT`
pub fn acme_client() -> RobawsClient {
    RobawsClient {
        id: 12,
        name: "Acme Trading".to_string(),
        email: Some("info@acme-trading.be".to_string()),
        tel: Some("+32 470 12 34 56".to_string()),
        ..RobawsClient::default()
    }
}

/// Single-page PDF whose text layer holds `lines`
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    // One text object per line so the text layer keeps line breaks
    let mut content = String::new();
    for (i, line) in lines.iter().enumerate() {
        let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        content.push_str(&format!("BT /F1 11 Tf 72 {} Td ({}) Tj ET\n", 720 - 14 * i, escaped));
    }

    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    });
    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", pages_id);
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("PDF should serialize");
    buf
}

/// Multipart email with a text body and one attachment
pub fn email_with_attachment(
    from: &str,
    subject: &str,
    body: &str,
    attachment: (&str, &str, &[u8]),
) -> Vec<u8> {
    let (filename, mime, bytes) = attachment;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let wrapped: Vec<String> = encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk).to_string())
        .collect();

    format!(
        "From: {from}\r\n\
To: quotes@belgaco.be\r\n\
Subject: {subject}\r\n\
Date: Tue, 1 Oct 2024 09:30:00 +0200\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\
\r\n\
--BOUNDARY\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
{body}\r\n\
--BOUNDARY\r\n\
Content-Type: {mime}; name=\"{filename}\"\r\n\
Content-Disposition: attachment; filename=\"{filename}\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
{attachment}\r\n\
--BOUNDARY--\r\n",
        body = body.replace('\n', "\r\n"),
        attachment = wrapped.join("\r\n"),
    )
    .into_bytes()
}
