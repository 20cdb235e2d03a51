//! Error types for certificate chain cross-checking.
//!
//! A failed check is distinct from a mismatch: every variant here means the
//! comparison could not be completed, whereas "certificates differ" is a
//! regular [`VerificationResult`](crate::VerificationResult).

use std::fmt;
use std::io;

use crate::chain::ChainOrigin;

/// Coarse classification of why a check could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FailureKind {
    /// DNS, connect, timeout or HTTP transport failure
    Transport,
    /// TLS handshake, HTTP status, decoding or schema failure
    Protocol,
    /// The caller supplied something unusable
    Input,
}

/// Underlying cause of a failed fetch or comparison.
#[derive(Debug)]
pub enum CertCheckError {
    /// DNS resolution failed for the given hostname
    DnsResolution {
        /// The hostname that failed to resolve
        hostname: String,
        /// The underlying I/O error
        source: io::Error,
    },

    /// TCP connection failed to every resolved address
    ConnectionFailed {
        /// The address (host:port) that connection failed to
        address: String,
        /// The last underlying I/O error
        source: io::Error,
    },

    /// Network operation timeout
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },

    /// TLS handshake failed
    HandshakeFailed {
        /// Details about why the handshake failed
        details: String,
    },

    /// The peer presented no usable certificate
    CertificateError {
        /// Description of what went wrong
        reason: String,
    },

    /// PEM text could not be encoded or decoded
    PemEncoding {
        /// Description of what went wrong
        reason: String,
    },

    /// The attestation request failed before a response arrived
    Http {
        /// The underlying transport error
        source: reqwest::Error,
    },

    /// The attestation service answered with a non-success status
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The attestation body is not the expected JSON
    JsonDecode {
        /// The underlying decoding error
        source: serde_json::Error,
    },

    /// A field required by the current comparison mode is absent
    MissingField {
        /// Dotted path of the field
        field: String,
    },

    /// Invalid input provided to the API
    InvalidInput {
        /// Which field/parameter was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },

    /// Attestation response body exceeded the configured limit
    ResponseTooLarge {
        /// Request URL
        url: String,
        /// Maximum accepted body length in bytes
        limit: u64,
    },

    /// Two snapshots were built under different modes or strategies
    IncomparableSnapshots {
        /// Why they cannot be compared
        reason: String,
    },

    /// OpenSSL error occurred
    OpenSSLError {
        /// The underlying OpenSSL error
        details: String,
    },

    /// Generic I/O error
    IoError {
        /// The underlying I/O error
        source: io::Error,
    },

    /// A generic error with a custom message
    Other {
        /// Error message
        message: String,
    },
}

impl CertCheckError {
    /// Classifies this cause as transport, protocol or input failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DnsResolution { .. }
            | Self::ConnectionFailed { .. }
            | Self::Timeout { .. }
            | Self::Http { .. }
            | Self::IoError { .. }
            | Self::Other { .. } => FailureKind::Transport,
            Self::HandshakeFailed { .. }
            | Self::CertificateError { .. }
            | Self::PemEncoding { .. }
            | Self::HttpStatus { .. }
            | Self::JsonDecode { .. }
            | Self::ResponseTooLarge { .. }
            | Self::MissingField { .. }
            | Self::IncomparableSnapshots { .. }
            | Self::OpenSSLError { .. } => FailureKind::Protocol,
            Self::InvalidInput { .. } => FailureKind::Input,
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }
}

impl fmt::Display for CertCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DnsResolution { hostname, .. } => {
                write!(
                    f,
                    "Failed to resolve hostname: {}. Check that the hostname is spelled correctly and your DNS configuration is working.",
                    hostname
                )
            }
            Self::ConnectionFailed { address, source } => {
                write!(f, "Connection failed to: {} ({})", address, source)
            }
            Self::Timeout { operation } => {
                write!(f, "Operation timed out: {}", operation)
            }
            Self::HandshakeFailed { details } => {
                write!(f, "TLS handshake failed: {}", details)
            }
            Self::CertificateError { reason } => {
                write!(f, "Certificate error: {}", reason)
            }
            Self::PemEncoding { reason } => {
                write!(f, "PEM encoding error: {}", reason)
            }
            Self::Http { source } => {
                write!(f, "Attestation request failed: {}", source)
            }
            Self::HttpStatus { url, status } => {
                write!(f, "Attestation service returned HTTP {} for {}", status, url)
            }
            Self::JsonDecode { source } => {
                write!(f, "Attestation response is not valid JSON: {}", source)
            }
            Self::ResponseTooLarge { url, limit } => {
                write!(f, "Attestation response from {} exceeds {} bytes", url, limit)
            }
            Self::MissingField { field } => {
                write!(f, "Attestation response is missing '{}'", field)
            }
            Self::InvalidInput { field, reason } => {
                write!(f, "Invalid input for '{}': {}", field, reason)
            }
            Self::IncomparableSnapshots { reason } => {
                write!(f, "Snapshots cannot be compared: {}", reason)
            }
            Self::OpenSSLError { details } => {
                write!(f, "OpenSSL error: {}", details)
            }
            Self::IoError { source } => {
                write!(f, "I/O error: {}", source)
            }
            Self::Other { message } => {
                write!(f, "{}", message)
            }
        }
    }
}

impl std::error::Error for CertCheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DnsResolution { source, .. } => Some(source),
            Self::ConnectionFailed { source, .. } => Some(source),
            Self::Http { source } => Some(source),
            Self::JsonDecode { source } => Some(source),
            Self::IoError { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for CertCheckError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout {
                operation: e.to_string(),
            },
            _ => Self::IoError { source: e },
        }
    }
}

impl From<&str> for CertCheckError {
    fn from(s: &str) -> Self {
        Self::Other {
            message: s.to_string(),
        }
    }
}

impl From<String> for CertCheckError {
    fn from(s: String) -> Self {
        Self::Other { message: s }
    }
}

impl From<openssl::error::ErrorStack> for CertCheckError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::OpenSSLError {
            details: e.to_string(),
        }
    }
}

impl<S: fmt::Debug> From<openssl::ssl::HandshakeError<S>> for CertCheckError {
    fn from(e: openssl::ssl::HandshakeError<S>) -> Self {
        Self::HandshakeFailed {
            details: format!("{}", e),
        }
    }
}

impl From<reqwest::Error> for CertCheckError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout {
                operation: format!("attestation request: {}", e),
            };
        }
        Self::Http { source: e }
    }
}

impl From<serde_json::Error> for CertCheckError {
    fn from(e: serde_json::Error) -> Self {
        Self::JsonDecode { source: e }
    }
}

/// A fetch that failed for one domain, tagged with which source failed.
#[derive(Debug)]
pub struct FetchError {
    /// Domain being checked
    pub domain: String,
    /// Which side of the comparison failed
    pub origin: ChainOrigin,
    /// What went wrong
    pub cause: CertCheckError,
}

impl FetchError {
    pub fn new(domain: impl Into<String>, origin: ChainOrigin, cause: CertCheckError) -> Self {
        FetchError {
            domain: domain.into(),
            origin,
            cause,
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.cause.kind()
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fetch for {} failed ({}): {}",
            self.origin,
            self.domain,
            self.kind(),
            self.cause
        )
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Why one domain's check could not produce a verdict.
#[derive(Debug)]
pub enum CheckFailure {
    /// The domain input itself was unusable
    InvalidDomain {
        input: String,
        cause: CertCheckError,
    },
    /// One of the two sources failed
    Fetch(FetchError),
    /// Both sources answered but their snapshots cannot be compared
    Reconcile {
        domain: String,
        cause: CertCheckError,
    },
    /// The check stopped without a verdict (a worker panicked)
    Aborted {
        input: String,
        cause: CertCheckError,
    },
}

impl CheckFailure {
    pub fn kind(&self) -> FailureKind {
        self.cause().kind()
    }

    pub fn cause(&self) -> &CertCheckError {
        match self {
            Self::InvalidDomain { cause, .. } => cause,
            Self::Fetch(e) => &e.cause,
            Self::Reconcile { cause, .. } => cause,
            Self::Aborted { cause, .. } => cause,
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDomain { input, cause } => write!(f, "'{}': {}", input, cause),
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Reconcile { domain, cause } => {
                write!(f, "comparison for {} failed: {}", domain, cause)
            }
            Self::Aborted { input, cause } => write!(f, "check for {} aborted: {}", input, cause),
        }
    }
}

impl std::error::Error for CheckFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            other => Some(other.cause()),
        }
    }
}

impl From<FetchError> for CheckFailure {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}
