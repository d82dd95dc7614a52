/*!
 * Error types for the robaws-intake application.
 *
 * Typed errors live at the seams that talk to the outside world (LLM
 * providers, the Robaws REST API, document parsing). Orchestration code
 * wraps them in `anyhow` with context.
 */

use thiserror::Error;

/// Errors that can occur when working with LLM provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::ConnectionError(_) | Self::RateLimitExceeded(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::ParseError(_) | Self::AuthenticationError(_) => false,
        }
    }
}

/// Errors returned by the Robaws REST client
#[derive(Error, Debug)]
pub enum RobawsError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout)
    #[error("Robaws request failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("Robaws API error {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// 429 from the API
    #[error("Robaws rate limit hit (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Value of the Retry-After header when present
        retry_after_secs: Option<u64>,
    },

    /// 401/403 from the API
    #[error("Robaws authentication failed: {0}")]
    Unauthorized(String),

    /// 404 from the API
    #[error("Robaws resource not found: {0}")]
    NotFound(String),

    /// Response body did not match the expected contract
    #[error("Failed to parse Robaws response: {0}")]
    Parse(String),
}

impl RobawsError {
    /// Whether the request should be retried with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) | Self::RateLimited { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Unauthorized(_) | Self::NotFound(_) | Self::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for RobawsError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Parse(error.to_string())
        } else {
            Self::Request(error.to_string())
        }
    }
}

/// Errors that can occur while turning a source file into text
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Email could not be parsed
    #[error("Failed to parse email: {0}")]
    Email(String),

    /// PDF could not be parsed
    #[error("Failed to read PDF: {0}")]
    Pdf(String),

    /// File could not be read from storage
    #[error("Failed to read stored file {path}: {message}")]
    Storage {
        /// Storage path of the file
        path: String,
        /// Underlying error message
        message: String,
    },
}

/// Errors that can occur during data extraction
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error while reading the source document
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// LLM answered with something that is not the expected JSON
    #[error("Invalid extraction response: {0}")]
    InvalidResponse(String),

    /// Nothing usable was found in any source file
    #[error("No extractable content for intake {0}")]
    NoContent(String),
}

/// Errors that can occur while exporting a quotation
#[derive(Error, Debug)]
pub enum ExportError {
    /// The intake has no resolved Robaws client yet
    #[error("Intake {0} has no resolved client")]
    MissingClient(String),

    /// The intake has no extraction to export
    #[error("Intake {0} has no extraction")]
    MissingExtraction(String),

    /// Offer validity does not give a representable date
    #[error("Offer validity of {0} days is out of range")]
    InvalidValidity(i64),

    /// Error from the Robaws API
    #[error("Robaws error: {0}")]
    Robaws(#[from] RobawsError),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the Robaws API
    #[error("Robaws error: {0}")]
    Robaws(#[from] RobawsError),

    /// Error from extraction
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Error from export
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
