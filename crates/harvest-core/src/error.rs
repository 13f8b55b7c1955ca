use thiserror::Error;

/// Application-wide error types for the harvester.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid configuration, rejected at construction time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP request failed or returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The archive byte stream could not be framed into records.
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// A record body could not be decoded into text.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The content extractor could not produce an article.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// No language could be detected for an article.
    #[error("Language detection error: {0}")]
    LanguageError(String),

    /// Writing extracted articles failed.
    #[error("Output error: {0}")]
    OutputError(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}
