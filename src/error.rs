//! Error types for the extraction engine.
//!
//! Uses `thiserror` for structured error definitions that provide
//! clear context about what went wrong. Every error is terminal for
//! the single operation that raised it; retry policy belongs to the
//! caller.

use thiserror::Error;

/// Main error type for extraction operations.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Secondary AJAX request failed at the transport layer
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Every page-source strategy came up empty
    #[error("no pages found in chapter document")]
    NoPagesFound,

    /// Every chapter-discovery state came up empty
    #[error("no chapters found for {0}")]
    NoChaptersFound(String),

    /// The document shows a login wall instead of content
    #[error("login required: {0}")]
    LoginRequired(String),

    /// An AJAX body was not parseable as the expected HTML/JSON
    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    /// Decryption of a protector blob failed
    #[error("protector decryption failed: {0}")]
    Cipher(#[from] CipherError),
}

/// Error type for the salted-blob cipher subsystem.
#[derive(Error, Debug)]
pub enum CipherError {
    /// Ciphertext is not valid base64
    #[error("invalid base64 in ciphertext: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Blob too short, missing salt header, or salt not valid hex
    #[error("malformed cipher blob: {0}")]
    MalformedBlob(String),

    /// Block padding did not validate; wrong password or corrupt data
    #[error("bad padding: wrong password or corrupt ciphertext")]
    BadPadding,

    /// Decrypted bytes are not valid UTF-8
    #[error("decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Error type for site-configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A configured CSS selector did not compile
    #[error("invalid selector for '{key}': {selector}")]
    InvalidSelector { key: String, selector: String },

    /// Missing required configuration value
    #[error("missing required config value: {0}")]
    MissingValue(String),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
