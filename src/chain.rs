//! Per-source views of a domain's certificate chain.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::domain::Domain;
use crate::error::{CertCheckError, FetchError};
use crate::fingerprint::{Fingerprint, FingerprintStrategy, RawCertificate};

/// Which part of the chain is compared. Both sides of a comparison must use
/// the same mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonMode {
    /// Only the end-entity certificate
    LeafOnly,
    /// Leaf followed by every intermediate, order-sensitive
    #[default]
    FullChain,
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChainOrigin {
    /// Observed in a live TLS handshake
    Live,
    /// Reported by the attestation service
    Attested,
}

/// One source's fingerprints for a domain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSnapshot {
    pub origin: ChainOrigin,
    pub mode: ComparisonMode,
    pub strategy: FingerprintStrategy,
    pub fingerprints: Vec<Fingerprint>,
}

impl ChainSnapshot {
    /// Normalizes raw certificates into a snapshot, keeping only the leaf in
    /// leaf-only mode. An empty chain is an error.
    pub fn from_certificates(
        origin: ChainOrigin,
        mode: ComparisonMode,
        strategy: FingerprintStrategy,
        certificates: &[RawCertificate],
    ) -> Result<ChainSnapshot, CertCheckError> {
        let selected = match mode {
            ComparisonMode::LeafOnly => certificates.get(..1).unwrap_or(&[]),
            ComparisonMode::FullChain => certificates,
        };
        let fingerprints = selected.iter().map(|c| strategy.normalize(c)).collect();
        ChainSnapshot::from_fingerprints(origin, mode, strategy, fingerprints)
    }

    /// Wraps already computed fingerprints. Leaf-only snapshots hold exactly
    /// one fingerprint; every fingerprint must come from `strategy`.
    pub fn from_fingerprints(
        origin: ChainOrigin,
        mode: ComparisonMode,
        strategy: FingerprintStrategy,
        fingerprints: Vec<Fingerprint>,
    ) -> Result<ChainSnapshot, CertCheckError> {
        if fingerprints.is_empty() {
            return Err(CertCheckError::CertificateError {
                reason: format!("{} chain contains no certificates", origin),
            });
        }
        if mode == ComparisonMode::LeafOnly && fingerprints.len() != 1 {
            return Err(CertCheckError::IncomparableSnapshots {
                reason: format!(
                    "leaf-only snapshot needs one fingerprint, got {}",
                    fingerprints.len()
                ),
            });
        }
        if let Some(other) = fingerprints.iter().find(|f| f.strategy() != strategy) {
            return Err(CertCheckError::IncomparableSnapshots {
                reason: format!(
                    "{} fingerprint in a {} snapshot",
                    other.strategy(),
                    strategy
                ),
            });
        }
        Ok(ChainSnapshot {
            origin,
            mode,
            strategy,
            fingerprints,
        })
    }

    pub fn leaf(&self) -> &Fingerprint {
        &self.fingerprints[0]
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

/// A source of chain snapshots. Implementations own their network
/// connection for the duration of one call and release it on every path.
pub trait ChainFetcher: Send + Sync {
    fn origin(&self) -> ChainOrigin;

    fn fetch(&self, domain: &Domain) -> Result<ChainSnapshot, FetchError>;
}
