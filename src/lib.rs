//! Detects divergence between the certificate chain a server presents in a
//! live TLS handshake and the chain an independent attestation service has
//! recorded for the same domain.
//!
//! Each check fetches both views (concurrently), reduces every certificate to
//! a canonical fingerprint and compares the two sequences. The outcome is
//! either a [`VerificationResult`] (matched or mismatched) or a
//! [`CheckFailure`] when the comparison could not be completed.
//!
//! ```no_run
//! use certmatch::{CheckOptions, ComparisonMode, Validator};
//!
//! let options = CheckOptions {
//!     mode: ComparisonMode::LeafOnly,
//!     ..CheckOptions::default()
//! };
//! let validator = Validator::new(&options)?;
//! let outcomes = validator.validate_batch(&["cert.ist".to_string(), "urip.io".to_string()]);
//! for outcome in outcomes {
//!     println!("{}: {}", outcome.input, outcome.status());
//! }
//! # Ok::<(), certmatch::CertCheckError>(())
//! ```

pub mod attested;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod live;
pub mod reconcile;
pub mod validator;

pub use attested::AttestedChainFetcher;
pub use chain::{ChainFetcher, ChainOrigin, ChainSnapshot, ComparisonMode};
pub use domain::Domain;
pub use error::{CertCheckError, CheckFailure, FailureKind, FetchError};
pub use fingerprint::{normalize, Fingerprint, FingerprintStrategy, RawCertificate};
pub use live::LiveChainFetcher;
pub use reconcile::{reconcile, Divergence, VerificationResult};
pub use validator::{
    validate_certificate, CheckOptions, CheckStatus, DomainOutcome, Validator, DEFAULT_MAX_WORKERS,
};
