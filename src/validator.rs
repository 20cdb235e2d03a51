//! Runs both fetches for a domain, reconciles them, and fans out batches.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, Sender};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::attested::{AttestedChainFetcher, DEFAULT_API_TIMEOUT, DEFAULT_API_URL};
use crate::chain::{ChainFetcher, ChainOrigin, ChainSnapshot, ComparisonMode};
use crate::domain::Domain;
use crate::error::{CertCheckError, CheckFailure, FetchError};
use crate::fingerprint::FingerprintStrategy;
use crate::live::{LiveChainFetcher, DEFAULT_TLS_PORT, DEFAULT_TLS_TIMEOUT};
use crate::reconcile::{reconcile, VerificationResult};

/// Settings shared by both fetchers so that their snapshots are comparable.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOptions {
    pub mode: ComparisonMode,
    pub strategy: FingerprintStrategy,
    pub port: u16,
    pub tls_timeout: Duration,
    pub api_url: String,
    pub api_timeout: Duration,
    /// Upper bound on domains checked at once by `validate_batch`
    pub max_workers: usize,
}

/// Default cap on concurrently checked domains.
pub const DEFAULT_MAX_WORKERS: usize = 16;

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            mode: ComparisonMode::default(),
            strategy: FingerprintStrategy::default(),
            port: DEFAULT_TLS_PORT,
            tls_timeout: DEFAULT_TLS_TIMEOUT,
            api_url: DEFAULT_API_URL.to_string(),
            api_timeout: DEFAULT_API_TIMEOUT,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Matched,
    Mismatched,
    Failed,
}

/// Result of checking one domain of a batch.
#[derive(Debug)]
pub struct DomainOutcome {
    /// The domain as the caller supplied it
    pub input: String,
    pub result: Result<VerificationResult, CheckFailure>,
}

impl DomainOutcome {
    pub fn status(&self) -> CheckStatus {
        match &self.result {
            Ok(r) if r.matched => CheckStatus::Matched,
            Ok(_) => CheckStatus::Mismatched,
            Err(_) => CheckStatus::Failed,
        }
    }
}

pub struct Validator {
    live: Box<dyn ChainFetcher>,
    attested: Box<dyn ChainFetcher>,
    max_workers: usize,
}

impl Validator {
    pub fn new(options: &CheckOptions) -> Result<Validator, CertCheckError> {
        let live = LiveChainFetcher::new(options.mode, options.strategy)
            .with_port(options.port)
            .with_timeout(options.tls_timeout);
        let attested = AttestedChainFetcher::new(
            &options.api_url,
            options.api_timeout,
            options.mode,
            options.strategy,
        )?;
        Ok(Validator::with_fetchers(live, attested).with_max_workers(options.max_workers))
    }

    pub fn with_fetchers(
        live: impl ChainFetcher + 'static,
        attested: impl ChainFetcher + 'static,
    ) -> Validator {
        Validator {
            live: Box::new(live),
            attested: Box::new(attested),
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Caps how many domains a batch checks at once. Zero is treated as one.
    pub fn with_max_workers(mut self, max_workers: usize) -> Validator {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Fetches both views of `domain` concurrently and compares them.
    pub fn validate(&self, domain: &Domain) -> Result<VerificationResult, CheckFailure> {
        let (live, attested) = thread::scope(|scope| {
            let attested = scope.spawn(|| guarded_fetch(self.attested.as_ref(), domain));
            let live = guarded_fetch(self.live.as_ref(), domain);
            let attested = attested
                .join()
                .unwrap_or_else(|payload| Err(panicked(domain, ChainOrigin::Attested, payload)));
            (live, attested)
        });

        let live = live?;
        let attested = attested?;
        reconcile(domain, live, attested).map_err(|cause| CheckFailure::Reconcile {
            domain: domain.to_string(),
            cause,
        })
    }

    /// Parses and checks one caller-supplied domain.
    pub fn check(&self, input: &str) -> DomainOutcome {
        let result = Domain::parse(input)
            .map_err(|cause| CheckFailure::InvalidDomain {
                input: input.to_string(),
                cause,
            })
            .and_then(|domain| self.validate(&domain));
        if let Err(e) = &result {
            warn!(domain = input, kind = %e.kind(), error = %e, "check failed");
        }
        DomainOutcome {
            input: input.to_string(),
            result,
        }
    }

    /// `true` only for a completed check whose chains matched.
    pub fn validate_certificate(&self, domain: &str) -> bool {
        self.check(domain).status() == CheckStatus::Matched
    }

    /// Checks every domain independently on at most `max_workers` threads.
    /// A failing or panicking domain never stops the others; outcomes come
    /// back in input order.
    pub fn validate_batch(&self, domains: &[String]) -> Vec<DomainOutcome> {
        let (sender, receiver): (Sender<(usize, DomainOutcome)>, Receiver<(usize, DomainOutcome)>) =
            mpsc::channel();
        let next = AtomicUsize::new(0);
        let workers = self.max_workers.min(domains.len());
        debug!(domains = domains.len(), workers, "starting batch");

        thread::scope(|scope| {
            for _ in 0..workers {
                let thread_tx = sender.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(domain) = domains.get(index) else {
                        break;
                    };
                    let outcome = self.isolated_check(domain);
                    if thread_tx.send((index, outcome)).is_err() {
                        debug!(domain = %domain, "batch receiver dropped");
                        break;
                    }
                });
            }
        });
        drop(sender);

        let mut outcomes: Vec<(usize, DomainOutcome)> = receiver.iter().collect();
        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<DomainOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        let failed = outcomes
            .iter()
            .filter(|o| o.status() == CheckStatus::Failed)
            .count();
        info!(domains = outcomes.len(), failed, "batch complete");
        outcomes
    }
}

impl Validator {
    /// `check` with any panic turned into a failed outcome for that domain.
    fn isolated_check(&self, input: &str) -> DomainOutcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.check(input))).unwrap_or_else(|payload| {
            let cause = CertCheckError::Other {
                message: format!("check panicked: {}", panic_message(payload.as_ref())),
            };
            error!(domain = input, error = %cause, "check aborted");
            DomainOutcome {
                input: input.to_string(),
                result: Err(CheckFailure::Aborted {
                    input: input.to_string(),
                    cause,
                }),
            }
        })
    }
}

fn guarded_fetch(
    fetcher: &dyn ChainFetcher,
    domain: &Domain,
) -> Result<ChainSnapshot, FetchError> {
    let origin = fetcher.origin();
    panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(domain)))
        .unwrap_or_else(|payload| Err(panicked(domain, origin, payload)))
}

fn panicked(domain: &Domain, origin: ChainOrigin, payload: Box<dyn Any + Send>) -> FetchError {
    let message = format!("{} fetch panicked: {}", origin, panic_message(payload.as_ref()));
    FetchError::new(domain.as_str(), origin, CertCheckError::Other { message })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Checks `domain` with default options.
pub fn validate_certificate(domain: &str) -> bool {
    match Validator::new(&CheckOptions::default()) {
        Ok(validator) => validator.validate_certificate(domain),
        Err(e) => {
            error!(error = %e, "could not set up validator");
            false
        }
    }
}
