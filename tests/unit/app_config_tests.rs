/*!
 * Tests for application configuration functionality
 */

use robaws_intake::app_config::{Config, LlmProvider, LogLevel};

use crate::common::{create_temp_dir, test_config};

/// Test default configuration values
#[test]
fn test_defaultConfig_shouldHaveDocumentedDefaults() {
    let config = Config::default();

    assert_eq!(config.robaws.base_url, "https://app.robaws.com");
    assert_eq!(config.extraction.provider, LlmProvider::OpenAI);
    assert!(config.extraction.use_llm);
    assert_eq!(config.resolver.name_similarity_threshold, 0.85);
    assert!(!config.resolver.create_missing_clients);
    assert_eq!(config.export.validity_days, 30);
    assert_eq!(config.export.field_code("destination"), Some("FDEST"));
    assert_eq!(config.worker.concurrency, 2);
    assert_eq!(config.log_level, LogLevel::Info);
}

/// A partial file fills every missing section from defaults
#[test]
fn test_deserialize_partialFile_shouldFillDefaults() {
    let json = r#"{
        "robaws": { "base_url": "https://acme.robaws.be", "username": "api", "password": "pw" },
        "extraction": { "provider": "anthropic", "use_llm": false },
        "log_level": "debug"
    }"#;

    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.robaws.base_url, "https://acme.robaws.be");
    assert_eq!(config.robaws.page_size, 100);
    assert_eq!(config.extraction.provider, LlmProvider::Anthropic);
    assert_eq!(config.export.title_template, "{customer} - {pol} > {pod} - {cargo}");
    assert_eq!(config.log_level, LogLevel::Debug);
    assert!(config.validate().is_ok());
}

/// Writing the default config and reading it back keeps it valid once credentials are set
#[test]
fn test_configFile_writeThenRead_shouldKeepValues() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");
    let mut config = test_config(dir.path());
    config.export.field_codes.insert("cargo".to_string(), "CARGO_DESC".to_string());

    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let loaded: Config = serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();

    assert_eq!(loaded.export.field_code("cargo"), Some("CARGO_DESC"));
    assert_eq!(loaded.storage.files_dir, config.storage.files_dir);
    assert!(loaded.validate().is_ok());
}

/// Test configuration validation
#[test]
fn test_validate_withVariousConfigs_shouldValidateCorrectly() {
    let dir = create_temp_dir().unwrap();
    let mut config = test_config(dir.path());
    assert!(config.validate().is_ok());

    config.robaws.password.clear();
    assert!(config.validate().is_err());
    config.robaws.password = "secret".to_string();

    config.robaws.base_url = "not a url".to_string();
    assert!(config.validate().is_err());
    config.robaws.base_url = "https://app.robaws.com".to_string();

    // LLM needs a key for the active provider
    config.extraction.use_llm = true;
    assert!(config.validate().is_err());
    config.extraction.set_api_key("sk-test");
    assert!(config.validate().is_ok());

    config.resolver.min_confidence = 1.5;
    assert!(config.validate().is_err());
    config.resolver.min_confidence = 0.7;

    config.worker.concurrency = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_filesDir_withoutExplicitDir_shouldSitNextToDatabase() {
    let dir = create_temp_dir().unwrap();
    let mut config = test_config(dir.path());
    config.storage.files_dir = None;

    assert_eq!(config.files_dir().unwrap(), dir.path().join("files"));
}
