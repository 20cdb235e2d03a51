//! Canonical certificate identities.
//!
//! Both sources are reduced to DER first and re-encoded as canonical PEM
//! (`CERTIFICATE` label, standard base64 wrapped at 64 columns, `\n` line
//! endings, trailing newline). The SHA-256 of that text is the same digest
//! the attestation service publishes for its chain entries.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::x509::X509;
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::CertCheckError;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";
const LINE_WIDTH: usize = 64;
const SHA256_HEX_LEN: usize = 64;

/// A DER-encoded certificate exactly as one source delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCertificate(Vec<u8>);

impl RawCertificate {
    pub fn from_der(der: Vec<u8>) -> RawCertificate {
        RawCertificate(der)
    }

    /// Decodes the first `CERTIFICATE` block of `text`.
    pub fn from_pem(text: &str) -> Result<RawCertificate, CertCheckError> {
        let mut certs = decode_pem_chain(text)?;
        Ok(certs.remove(0))
    }

    pub fn der(&self) -> &[u8] {
        &self.0
    }

    /// Deterministic PEM encoding of the DER bytes.
    pub fn to_pem(&self) -> String {
        let body = STANDARD.encode(&self.0);
        let mut pem = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 64);
        pem.push_str(PEM_BEGIN);
        pem.push('\n');
        let mut rest = body.as_str();
        while !rest.is_empty() {
            let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
            pem.push_str(line);
            pem.push('\n');
            rest = tail;
        }
        pem.push_str(PEM_END);
        pem.push('\n');
        pem
    }
}

/// Decodes every `CERTIFICATE` block in `text`, in order.
///
/// OpenSSL's PEM reader ignores line wrapping, so PEM produced by different
/// encoders yields the same DER. Certificates are kept in their original
/// encoding; `to_der` on an unmodified parsed certificate returns it as read.
pub fn decode_pem_chain(text: &str) -> Result<Vec<RawCertificate>, CertCheckError> {
    let stack = X509::stack_from_pem(text.as_bytes())
        .map_err(|e| pem_error(format!("unreadable CERTIFICATE block: {}", e)))?;
    if stack.is_empty() {
        return Err(pem_error("no CERTIFICATE block found".to_string()));
    }
    stack
        .iter()
        .map(|cert| {
            cert.to_der()
                .map(RawCertificate)
                .map_err(|e| pem_error(format!("cannot re-encode certificate: {}", e)))
        })
        .collect()
}

fn pem_error(reason: String) -> CertCheckError {
    CertCheckError::PemEncoding { reason }
}

/// How a certificate is turned into a comparable identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Display,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    /// Lower-case hex SHA-256 of the canonical PEM text
    #[default]
    Sha256,
    /// The canonical PEM text itself
    Pem,
}

impl FingerprintStrategy {
    pub fn normalize(self, cert: &RawCertificate) -> Fingerprint {
        let pem = cert.to_pem();
        let value = match self {
            FingerprintStrategy::Sha256 => hex::encode(openssl::sha::sha256(pem.as_bytes())),
            FingerprintStrategy::Pem => pem,
        };
        Fingerprint {
            strategy: self,
            value,
        }
    }
}

/// Canonical identity of one certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    strategy: FingerprintStrategy,
    value: String,
}

impl Fingerprint {
    /// Accepts a SHA-256 digest computed by someone else (the attestation
    /// service), normalized to lower-case hex.
    pub fn from_sha256_hex(digest: &str) -> Result<Fingerprint, CertCheckError> {
        let value = digest.trim().to_ascii_lowercase();
        if value.len() != SHA256_HEX_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CertCheckError::CertificateError {
                reason: format!("'{}' is not a SHA-256 hex digest", digest),
            });
        }
        Ok(Fingerprint {
            strategy: FingerprintStrategy::Sha256,
            value,
        })
    }

    pub fn strategy(&self) -> FingerprintStrategy {
        self.strategy
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Short form for human-readable reports.
    pub fn abbreviated(&self) -> String {
        match self.strategy {
            FingerprintStrategy::Sha256 => self.value.chars().take(16).collect(),
            FingerprintStrategy::Pem => {
                let digest = hex::encode(openssl::sha::sha256(self.value.as_bytes()));
                format!("pem:{}", &digest[..16])
            }
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

/// Normalizes `cert` with the given strategy.
pub fn normalize(cert: &RawCertificate, strategy: FingerprintStrategy) -> Fingerprint {
    strategy.normalize(cert)
}
