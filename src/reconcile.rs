//! Binary, order-sensitive comparison of two chain snapshots.

use serde::Serialize;
use tracing::info;

use crate::chain::ChainSnapshot;
use crate::domain::Domain;
use crate::error::CertCheckError;
use crate::fingerprint::Fingerprint;

/// Outcome of a completed comparison. `matched == false` is a verified
/// mismatch, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub domain: Domain,
    pub matched: bool,
    pub live: ChainSnapshot,
    pub attested: ChainSnapshot,
}

/// First point where two snapshots disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Divergence {
    /// Both chains have a certificate at `index` but they differ
    Position {
        index: usize,
        live: Fingerprint,
        attested: Fingerprint,
    },
    /// One chain is a strict prefix of the other
    Length { live: usize, attested: usize },
}

impl VerificationResult {
    pub fn divergence(&self) -> Option<Divergence> {
        if self.matched {
            return None;
        }
        let live = &self.live.fingerprints;
        let attested = &self.attested.fingerprints;
        let position = live
            .iter()
            .zip(attested.iter())
            .position(|(l, a)| l != a);
        match position {
            Some(index) => Some(Divergence::Position {
                index,
                live: live[index].clone(),
                attested: attested[index].clone(),
            }),
            None => Some(Divergence::Length {
                live: live.len(),
                attested: attested.len(),
            }),
        }
    }
}

/// Compares two snapshots taken under the same mode and strategy.
///
/// Chains are compared as sequences: same length and the same fingerprint at
/// every position. A permutation of the expected chain is a mismatch.
pub fn reconcile(
    domain: &Domain,
    live: ChainSnapshot,
    attested: ChainSnapshot,
) -> Result<VerificationResult, CertCheckError> {
    if live.mode != attested.mode {
        return Err(CertCheckError::IncomparableSnapshots {
            reason: format!("{} snapshot against {} snapshot", live.mode, attested.mode),
        });
    }
    if live.strategy != attested.strategy {
        return Err(CertCheckError::IncomparableSnapshots {
            reason: format!(
                "{} fingerprints against {} fingerprints",
                live.strategy, attested.strategy
            ),
        });
    }

    let matched = live.fingerprints == attested.fingerprints;
    info!(%domain, mode = %live.mode, matched, "certificates compared");
    Ok(VerificationResult {
        domain: domain.clone(),
        matched,
        live,
        attested,
    })
}
