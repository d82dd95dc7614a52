use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::default::Default;
use std::path::PathBuf;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Robaws API connection
    #[serde(default)]
    pub robaws: RobawsConfig,

    /// Extraction settings (patterns and LLM)
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Client resolution settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Quotation export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Database and file storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Background worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// LLM provider type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    // @provider: OpenAI
    #[default]
    OpenAI,
    // @provider: Anthropic
    Anthropic,
}

impl LlmProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Max chars of document text per request
    #[serde(default = "default_max_chars_per_request")]
    pub max_chars_per_request: usize,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: LlmProvider) -> Self {
        match provider_type {
            LlmProvider::OpenAI => Self {
                provider_type: "openai".to_string(),
                model: default_openai_model(),
                api_key: String::new(),
                endpoint: default_openai_endpoint(),
                max_chars_per_request: default_max_chars_per_request(),
                timeout_secs: default_timeout_secs(),
            },
            LlmProvider::Anthropic => Self {
                provider_type: "anthropic".to_string(),
                model: default_anthropic_model(),
                api_key: String::new(),
                endpoint: default_anthropic_endpoint(),
                max_chars_per_request: default_max_chars_per_request(),
                timeout_secs: default_timeout_secs(),
            },
        }
    }
}

/// Robaws REST API configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RobawsConfig {
    /// Base URL, e.g. https://app.robaws.com
    #[serde(default = "default_robaws_base_url")]
    pub base_url: String,

    /// Basic auth user
    #[serde(default = "String::new")]
    pub username: String,

    /// Basic auth password
    #[serde(default = "String::new")]
    pub password: String,

    /// Page size for paginated client listing
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Maximum number of client pages scanned during name matching
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry count for transient failures
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for RobawsConfig {
    fn default() -> Self {
        Self {
            base_url: default_robaws_base_url(),
            username: String::new(),
            password: String::new(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Extraction configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,

    /// Available LLM providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Whether to call the LLM at all (patterns only when false)
    #[serde(default = "default_true")]
    pub use_llm: bool,

    /// Whether images and scanned PDFs are sent to the vision model
    #[serde(default = "default_true")]
    pub use_vision: bool,

    /// System prompt for the extraction call
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Temperature parameter for generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in the LLM answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Retry count for failed LLM requests
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Backoff base for LLM retries (in milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Email domains that belong to us; addresses there are never a customer contact
    #[serde(default)]
    pub own_domains: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            available_providers: vec![
                ProviderConfig::new(LlmProvider::OpenAI),
                ProviderConfig::new(LlmProvider::Anthropic),
            ],
            use_llm: true,
            use_vision: true,
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            own_domains: Vec::new(),
        }
    }
}

/// Client resolution configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Minimum score for a candidate to be accepted
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Minimum normalized-name similarity for a fuzzy name hit
    #[serde(default = "default_name_similarity_threshold")]
    pub name_similarity_threshold: f32,

    /// Create a client in Robaws when nothing matches
    #[serde(default)]
    pub create_missing_clients: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            name_similarity_threshold: default_name_similarity_threshold(),
            create_missing_clients: false,
        }
    }
}

/// Quotation export configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExportConfig {
    /// Logical field name -> Robaws extra field code
    #[serde(default = "default_field_codes")]
    pub field_codes: BTreeMap<String, String>,

    /// Offer title template
    /// Placeholders: {pol}, {pod}, {cargo}, {customer}
    #[serde(default = "default_title_template")]
    pub title_template: String,

    /// Offer validity in days from today
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,

    /// Upload the intake's source files to the offer
    #[serde(default = "default_true")]
    pub attach_documents: bool,

    /// Export attempts before an intake is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay before an export is retried, doubled per attempt
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            field_codes: default_field_codes(),
            title_template: default_title_template(),
            validity_days: default_validity_days(),
            attach_documents: true,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl ExportConfig {
    /// Robaws extra field code for a logical field, if mapped
    pub fn field_code(&self, logical: &str) -> Option<&str> {
        self.field_codes
            .get(logical)
            .map(String::as_str)
            .filter(|code| !code.is_empty())
    }
}

/// Database and file storage configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite database file (defaults to the user data directory)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Directory where intake files are stored (defaults next to the database)
    #[serde(default)]
    pub files_dir: Option<PathBuf>,
}

/// Background worker configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Intakes processed in parallel
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Seconds between polls of the queue
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Intakes claimed per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_max_chars_per_request() -> usize {
    24000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // doubled on each retry
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    50
}

fn default_min_confidence() -> f32 {
    0.7
}

fn default_name_similarity_threshold() -> f32 {
    0.85
}

/// Upper bound for `export.validity_days`, ten years
const MAX_VALIDITY_DAYS: i64 = 3650;

fn default_validity_days() -> i64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_concurrency() -> usize {
    2
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_batch_size() -> usize {
    10
}

fn default_robaws_base_url() -> String {
    "https://app.robaws.com".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_system_prompt() -> String {
    "You are a logistics data extraction assistant for a RoRo and container shipping forwarder. Extract shipment, vehicle and contact details from customer inquiries. Answer with JSON only. Use null for anything not stated; never guess.".to_string()
}

fn default_title_template() -> String {
    "{customer} - {pol} > {pod} - {cargo}".to_string()
}

pub(crate) fn default_field_codes() -> BTreeMap<String, String> {
    [
        ("por", "POR"),
        ("pol", "POL"),
        ("pod", "POD"),
        ("destination", "FDEST"),
        ("cargo", "CARGO"),
        ("dimensions", "DIM_BEF_DELIVERY"),
        ("customer_reference", "CUSTOMER_REFERENCE"),
        ("contact", "CONTACT"),
        ("raw_json", "JSON"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.robaws.base_url.trim().is_empty() {
            return Err(anyhow!("Robaws base URL is required"));
        }
        url::Url::parse(&self.robaws.base_url)
            .map_err(|e| anyhow!("Invalid Robaws base URL '{}': {}", self.robaws.base_url, e))?;

        if self.robaws.username.is_empty() || self.robaws.password.is_empty() {
            return Err(anyhow!("Robaws username and password are required"));
        }

        if self.robaws.page_size == 0 {
            return Err(anyhow!("Robaws page size must be at least 1"));
        }

        if self.extraction.use_llm && self.extraction.get_api_key().is_empty() {
            return Err(anyhow!(
                "API key is required for {} provider when LLM extraction is enabled",
                self.extraction.provider.display_name()
            ));
        }

        for (name, value) in [
            ("resolver.min_confidence", self.resolver.min_confidence),
            (
                "resolver.name_similarity_threshold",
                self.resolver.name_similarity_threshold,
            ),
            ("extraction.temperature", self.extraction.temperature),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
            }
        }

        for (name, value) in [
            ("worker.concurrency", self.worker.concurrency as u64),
            ("worker.batch_size", self.worker.batch_size as u64),
            ("worker.poll_interval_secs", self.worker.poll_interval_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be at least 1", name));
            }
        }

        if !(1..=MAX_VALIDITY_DAYS).contains(&self.export.validity_days) {
            return Err(anyhow!(
                "export.validity_days must be between 1 and {}, got {}",
                MAX_VALIDITY_DAYS,
                self.export.validity_days
            ));
        }

        if self.export.max_attempts == 0 {
            return Err(anyhow!("export.max_attempts must be at least 1"));
        }

        Ok(())
    }

    /// Resolved database path (explicit or under the user data directory)
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => crate::database::DatabaseConnection::default_database_path(),
        }
    }

    /// Resolved directory for stored intake files
    pub fn files_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.files_dir {
            return Ok(dir.clone());
        }
        let db_path = self.database_path()?;
        let parent = db_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(parent.join("files"))
    }
}

impl ExtractionConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        let provider_str = self.provider.to_lowercase_string();
        self.available_providers
            .iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.model.is_empty() {
                return provider_config.model.clone();
            }
        }

        match self.provider {
            LlmProvider::OpenAI => default_openai_model(),
            LlmProvider::Anthropic => default_anthropic_model(),
        }
    }

    /// Get the API key for the active provider
    pub fn get_api_key(&self) -> String {
        self.get_active_provider_config()
            .map(|p| p.api_key.clone())
            .unwrap_or_default()
    }

    /// Get the endpoint for the active provider
    pub fn get_endpoint(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.endpoint.is_empty() {
                return provider_config.endpoint.clone();
            }
        }

        match self.provider {
            LlmProvider::OpenAI => default_openai_endpoint(),
            LlmProvider::Anthropic => default_anthropic_endpoint(),
        }
    }

    /// Get the max chars per request for the active provider
    pub fn get_max_chars_per_request(&self) -> usize {
        self.get_active_provider_config()
            .map(|p| p.max_chars_per_request)
            .filter(|n| *n > 0)
            .unwrap_or_else(default_max_chars_per_request)
    }

    /// Get the request timeout for the active provider
    pub fn get_timeout_secs(&self) -> u64 {
        self.get_active_provider_config()
            .map(|p| p.timeout_secs)
            .filter(|n| *n > 0)
            .unwrap_or_else(default_timeout_secs)
    }

    /// Set the API key of the active provider, adding its entry if missing
    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        let provider_str = self.provider.to_lowercase_string();
        if !self
            .available_providers
            .iter()
            .any(|p| p.provider_type == provider_str)
        {
            self.available_providers
                .push(ProviderConfig::new(self.provider));
        }
        if let Some(provider_config) = self
            .available_providers
            .iter_mut()
            .find(|p| p.provider_type == provider_str)
        {
            provider_config.api_key = api_key.into();
        }
    }
}
