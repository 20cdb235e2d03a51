use lazy_static::lazy_static;
use prometheus::{labels, register_gauge, Gauge};

use certmatch::{CheckStatus, DomainOutcome};

lazy_static! {
    static ref CERTMATCH_CHAIN_MATCHED: Gauge = register_gauge!(
        "certmatch_chain_matched",
        "1 when live and attested chains match, 0 on mismatch, -1 when the check failed"
    )
    .unwrap();
    static ref CERTMATCH_CHAIN_LENGTH: Gauge = register_gauge!(
        "certmatch_live_chain_length",
        "number of certificates compared from the live handshake"
    )
    .unwrap();
}

/// Pushes one verdict per domain to a Prometheus push gateway.
/// # Arguments
/// * `outcomes` - Batch outcomes in input order
/// * `prometheus_address` - Push gateway base address
/// * `mode` - Comparison mode label
///
/// Grouping label values may not contain `/`, so URL-style inputs are flattened.
pub fn prometheus_metrics(outcomes: &[DomainOutcome], prometheus_address: &str, mode: &str) {
    for outcome in outcomes {
        let verdict = match outcome.status() {
            CheckStatus::Matched => 1.0,
            CheckStatus::Mismatched => 0.0,
            CheckStatus::Failed => -1.0,
        };
        CERTMATCH_CHAIN_MATCHED.set(verdict);
        let compared = outcome.result.as_ref().map(|r| r.live.len()).unwrap_or(0);
        CERTMATCH_CHAIN_LENGTH.set(compared as f64);

        let metric_families = prometheus::gather();
        let push = prometheus::push_metrics(
            "certmatch",
            labels! {
                "instance".to_owned() => "certmatch".to_owned(),
                "domain".to_owned() => outcome.input.replace('/', "_"),
                "mode".to_owned() => mode.to_owned(),
                "status".to_owned() => outcome.status().to_string(),
            },
            &format!("{}/metrics/job", prometheus_address),
            metric_families,
            None,
        );

        if let Err(e) = push {
            tracing::warn!(domain = %outcome.input, error = %e, "failed to push metrics to prometheus");
        }
    }
}
