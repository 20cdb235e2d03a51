//! Reads the chain an attestation service has recorded for a domain.
//!
//! The service answers `GET <base>/<domain>` with a JSON document. Only the
//! fields below are read; everything else in the body is ignored.
//!
//! ```json
//! {
//!   "certificate": { "pem": "-----BEGIN CERTIFICATE-----..." },
//!   "chain": [
//!     { "certificate_pem": "-----BEGIN CERTIFICATE-----...",
//!       "pem": { "hashes": { "sha256": "bdde2927..." } } }
//!   ]
//! }
//! ```

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::chain::{ChainFetcher, ChainOrigin, ChainSnapshot, ComparisonMode};
use crate::domain::Domain;
use crate::error::{CertCheckError, FetchError};
use crate::fingerprint::{Fingerprint, FingerprintStrategy, RawCertificate};

pub const DEFAULT_API_URL: &str = "https://api.cert.ist";
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(15);
/// Largest attestation body read before giving up.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct LeafReply {
    certificate: Option<LeafEntry>,
}

#[derive(Debug, Deserialize)]
struct ChainReply {
    chain: Option<Vec<ChainEntry>>,
}

#[derive(Debug, Deserialize)]
struct LeafEntry {
    pem: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChainEntry {
    certificate_pem: Option<String>,
    pem: Option<PemDetails>,
}

#[derive(Debug, Deserialize)]
struct PemDetails {
    hashes: Option<PemHashes>,
}

#[derive(Debug, Deserialize)]
struct PemHashes {
    sha256: Option<String>,
}

impl ChainEntry {
    fn sha256(&self) -> Option<&str> {
        self.pem.as_ref()?.hashes.as_ref()?.sha256.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct AttestedChainFetcher {
    client: Client,
    base_url: Url,
    mode: ComparisonMode,
    strategy: FingerprintStrategy,
    max_body: u64,
}

impl AttestedChainFetcher {
    /// Builds a fetcher for the service rooted at `base_url`. Every request
    /// is bounded by `timeout`, connection and body included.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        mode: ComparisonMode,
        strategy: FingerprintStrategy,
    ) -> Result<Self, CertCheckError> {
        let base_url = parse_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(AttestedChainFetcher {
            client,
            base_url,
            mode,
            strategy,
            max_body: DEFAULT_MAX_BODY_BYTES,
        })
    }

    pub fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }

    /// `<base>/<domain>`, with the domain as a single path segment.
    pub fn endpoint(&self, domain: &Domain) -> Result<Url, CertCheckError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CertCheckError::InvalidInput {
                field: "api_url".to_string(),
                reason: "cannot be used as a base URL".to_string(),
            })?
            .pop_if_empty()
            .push(domain.as_str());
        Ok(url)
    }

    fn fetch_body(&self, domain: &Domain) -> Result<Vec<u8>, CertCheckError> {
        let url = self.endpoint(domain)?;
        debug!(%domain, %url, "querying attestation service");
        let mut response = self.client.get(url.clone()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CertCheckError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let too_large = || CertCheckError::ResponseTooLarge {
            url: url.to_string(),
            limit: self.max_body,
        };
        if response.content_length().is_some_and(|len| len > self.max_body) {
            return Err(too_large());
        }
        let mut body = Vec::new();
        (&mut response).take(self.max_body + 1).read_to_end(&mut body)?;
        if body.len() as u64 > self.max_body {
            return Err(too_large());
        }
        Ok(body)
    }

    /// Turns an attestation body into a snapshot for the configured mode.
    pub fn parse_snapshot(&self, body: &[u8]) -> Result<ChainSnapshot, CertCheckError> {
        let fingerprints = match self.mode {
            ComparisonMode::LeafOnly => {
                let reply: LeafReply = serde_json::from_slice(body)?;
                let pem = reply
                    .certificate
                    .and_then(|c| c.pem)
                    .ok_or_else(|| CertCheckError::missing("certificate.pem"))?;
                vec![self.strategy.normalize(&RawCertificate::from_pem(&pem)?)]
            }
            ComparisonMode::FullChain => {
                let reply: ChainReply = serde_json::from_slice(body)?;
                let chain = reply
                    .chain
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| CertCheckError::missing("chain"))?;
                chain
                    .iter()
                    .enumerate()
                    .map(|(index, entry)| self.entry_fingerprint(index, entry))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        ChainSnapshot::from_fingerprints(
            ChainOrigin::Attested,
            self.mode,
            self.strategy,
            fingerprints,
        )
    }

    fn entry_fingerprint(
        &self,
        index: usize,
        entry: &ChainEntry,
    ) -> Result<Fingerprint, CertCheckError> {
        if self.strategy == FingerprintStrategy::Sha256 {
            if let Some(digest) = entry.sha256() {
                return Fingerprint::from_sha256_hex(digest);
            }
        }
        match entry.certificate_pem.as_deref() {
            Some(pem) => Ok(self.strategy.normalize(&RawCertificate::from_pem(pem)?)),
            None if self.strategy == FingerprintStrategy::Sha256 => Err(CertCheckError::missing(
                &format!("chain[{}].pem.hashes.sha256", index),
            )),
            None => Err(CertCheckError::missing(&format!("chain[{}].certificate_pem", index))),
        }
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, CertCheckError> {
    let invalid = |reason: String| CertCheckError::InvalidInput {
        field: "api_url".to_string(),
        reason,
    };
    let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("cannot be used as a base URL".to_string()));
    }
    Ok(url)
}

impl ChainFetcher for AttestedChainFetcher {
    fn origin(&self) -> ChainOrigin {
        ChainOrigin::Attested
    }

    fn fetch(&self, domain: &Domain) -> Result<ChainSnapshot, FetchError> {
        let wrap = |cause| FetchError::new(domain.as_str(), ChainOrigin::Attested, cause);
        let body = self.fetch_body(domain).map_err(wrap)?;
        let snapshot = self.parse_snapshot(&body).map_err(wrap)?;
        debug!(%domain, count = snapshot.len(), "attested chain received");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF_PEM: &str = include_str!("../tests/fixtures/leaf.pem");
    const LEAF_SHA256: &str = "bdde29270fbaf8e3df6c40bf71fc4fde6b5bdea3528c052328e479106d534928";
    const INTERMEDIATE_SHA256: &str =
        "8f0dba213d83c7fc31aa6388bc5568cf615b295893d3f49585955905c356b200";

    fn fetcher(mode: ComparisonMode, strategy: FingerprintStrategy) -> AttestedChainFetcher {
        AttestedChainFetcher::new(DEFAULT_API_URL, DEFAULT_API_TIMEOUT, mode, strategy).unwrap()
    }

    #[test]
    fn test_endpoint_appends_domain_segment() {
        let domain = Domain::parse("example.test").unwrap();
        let f = fetcher(ComparisonMode::LeafOnly, FingerprintStrategy::Sha256);
        assert_eq!(f.endpoint(&domain).unwrap().as_str(), "https://api.cert.ist/example.test");

        let f = AttestedChainFetcher::new(
            "http://127.0.0.1:8080/v1/",
            DEFAULT_API_TIMEOUT,
            ComparisonMode::LeafOnly,
            FingerprintStrategy::Sha256,
        )
        .unwrap();
        assert_eq!(
            f.endpoint(&domain).unwrap().as_str(),
            "http://127.0.0.1:8080/v1/example.test"
        );
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        for bad in ["not a url", "ftp://api.test", "mailto:someone@api.test"] {
            assert!(AttestedChainFetcher::new(
                bad,
                DEFAULT_API_TIMEOUT,
                ComparisonMode::LeafOnly,
                FingerprintStrategy::Sha256
            )
            .is_err());
        }
    }

    #[test]
    fn test_leaf_only_ignores_unknown_fields() {
        let body = serde_json::json!({
            "certificate": { "pem": LEAF_PEM, "hashes": { "md5": "ignored" } },
            "chain": "leaf-only mode never reads this",
            "extra": [1, 2, 3]
        });
        let f = fetcher(ComparisonMode::LeafOnly, FingerprintStrategy::Sha256);
        let snapshot = f.parse_snapshot(body.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.origin, ChainOrigin::Attested);
        assert_eq!(snapshot.leaf().as_str(), LEAF_SHA256);
    }

    #[test]
    fn test_leaf_only_requires_certificate_pem() {
        let f = fetcher(ComparisonMode::LeafOnly, FingerprintStrategy::Sha256);
        let err = f.parse_snapshot(br#"{"certificate": {}}"#).unwrap_err();
        assert!(matches!(err, CertCheckError::MissingField { ref field } if field == "certificate.pem"));
    }

    #[test]
    fn test_full_chain_uses_service_digests() {
        let body = serde_json::json!({
            "chain": [
                { "pem": { "hashes": { "sha256": LEAF_SHA256.to_uppercase() } } },
                { "pem": { "hashes": { "sha256": INTERMEDIATE_SHA256 } }, "der": {} }
            ]
        });
        let f = fetcher(ComparisonMode::FullChain, FingerprintStrategy::Sha256);
        let snapshot = f.parse_snapshot(body.to_string().as_bytes()).unwrap();
        let values: Vec<&str> = snapshot.fingerprints.iter().map(|f| f.as_str()).collect();
        assert_eq!(values, vec![LEAF_SHA256, INTERMEDIATE_SHA256]);
    }

    #[test]
    fn test_full_chain_falls_back_to_certificate_pem() {
        let body = serde_json::json!({
            "chain": [ { "certificate_pem": LEAF_PEM } ]
        });
        let f = fetcher(ComparisonMode::FullChain, FingerprintStrategy::Sha256);
        let snapshot = f.parse_snapshot(body.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.leaf().as_str(), LEAF_SHA256);
    }

    #[test]
    fn test_pem_strategy_needs_certificate_pem() {
        let body = serde_json::json!({
            "chain": [ { "pem": { "hashes": { "sha256": LEAF_SHA256 } } } ]
        });
        let f = fetcher(ComparisonMode::FullChain, FingerprintStrategy::Pem);
        let err = f.parse_snapshot(body.to_string().as_bytes()).unwrap_err();
        assert!(
            matches!(err, CertCheckError::MissingField { ref field } if field == "chain[0].certificate_pem")
        );
    }

    #[test]
    fn test_full_chain_missing_or_empty() {
        let f = fetcher(ComparisonMode::FullChain, FingerprintStrategy::Sha256);
        for body in [r#"{}"#, r#"{"chain": []}"#] {
            let err = f.parse_snapshot(body.as_bytes()).unwrap_err();
            assert!(matches!(err, CertCheckError::MissingField { .. }));
        }
        let err = f.parse_snapshot(br#"{"chain": [{}]}"#).unwrap_err();
        assert!(
            matches!(err, CertCheckError::MissingField { ref field } if field == "chain[0].pem.hashes.sha256")
        );
    }

    #[test]
    fn test_malformed_json() {
        let f = fetcher(ComparisonMode::FullChain, FingerprintStrategy::Sha256);
        let err = f.parse_snapshot(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, CertCheckError::JsonDecode { .. }));
    }
}
