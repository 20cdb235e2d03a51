use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use certmatch::config::{Config, OutputFormat, PrometheusConfig, Settings, DEFAULT_CONFIG_FILE};
use certmatch::{
    ChainSnapshot, CheckStatus, Divergence, DomainOutcome, Validator, VerificationResult,
};

mod metrics;

#[derive(Parser, Debug)]
#[command(name = "certmatch", version, author, about, long_about = None)]
struct Cli {
    /// Domains to check
    hosts: Vec<String>,

    /// Output format: json, text, summary
    #[arg(short, long)]
    output: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Comparison mode: leaf-only, full-chain
    #[arg(short, long)]
    mode: Option<String>,

    /// Fingerprint strategy: sha256, pem
    #[arg(short, long)]
    strategy: Option<String>,

    /// Port for the live TLS handshake
    #[arg(short, long)]
    port: Option<u16>,

    /// Attestation service base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Live dial and handshake timeout in seconds
    #[arg(long)]
    tls_timeout: Option<u64>,

    /// Attestation request timeout in seconds
    #[arg(long)]
    api_timeout: Option<u64>,

    /// Exit code when any domain mismatched or failed (default 0)
    #[arg(long)]
    exit_code: Option<i32>,

    /// Maximum number of domains checked at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Push verdicts to a Prometheus push gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus push gateway address
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_config(&self) -> Config {
        Config {
            hosts: if self.hosts.is_empty() {
                None
            } else {
                Some(self.hosts.clone())
            },
            output: self.output.clone(),
            exit_code: self.exit_code,
            mode: self.mode.clone(),
            strategy: self.strategy.clone(),
            port: self.port,
            api_url: self.api_url.clone(),
            tls_timeout_secs: self.tls_timeout,
            api_timeout_secs: self.api_timeout,
            workers: self.workers,
            prometheus: Some(PrometheusConfig {
                enabled: if self.prometheus { Some(true) } else { None },
                address: self.prometheus_address.clone(),
            }),
        }
    }
}

#[derive(Serialize)]
struct OutcomeRecord<'a> {
    domain: &'a str,
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a VerificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    divergence: Option<Divergence>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a DomainOutcome> for OutcomeRecord<'a> {
    fn from(outcome: &'a DomainOutcome) -> Self {
        let (result, divergence, failure, error) = match &outcome.result {
            Ok(r) => (Some(r), r.divergence(), None, None),
            Err(e) => (None, None, Some(e.kind().to_string()), Some(e.to_string())),
        };
        OutcomeRecord {
            domain: &outcome.input,
            status: outcome.status(),
            result,
            divergence,
            failure,
            error,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            exit(2);
        }
    };

    let validator = match Validator::new(&settings.options) {
        Ok(validator) => validator,
        Err(e) => {
            eprintln!("Failed to set up checks: {}", e);
            exit(2);
        }
    };

    let outcomes = validator.validate_batch(&settings.hosts);

    match settings.output {
        OutputFormat::Json => print_json(&outcomes),
        OutputFormat::Text => print_text(&outcomes),
        OutputFormat::Summary => print_summary(&outcomes),
    }

    if let Some(address) = &settings.prometheus {
        metrics::prom::prometheus_metrics(&outcomes, address, settings.options.mode.as_ref());
    }

    let all_matched = outcomes.iter().all(|o| o.status() == CheckStatus::Matched);
    exit(if all_matched { 0 } else { settings.exit_code });
}

fn load_settings(cli: &Cli) -> Result<Settings, certmatch::config::ConfigError> {
    let file_config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::from_file(DEFAULT_CONFIG_FILE)?,
        None => Config::default(),
    };
    file_config.merge_with(cli.to_config()).resolve()
}

fn print_json(outcomes: &[DomainOutcome]) {
    let records: Vec<OutcomeRecord> = outcomes.iter().map(OutcomeRecord::from).collect();
    match serde_json::to_string_pretty(&records) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render JSON: {}", e),
    }
}

fn print_snapshot(title: &str, snapshot: &ChainSnapshot) {
    println!("{} ({} certificates):", title, snapshot.len());
    for (index, fingerprint) in snapshot.fingerprints.iter().enumerate() {
        println!("\t[{}] {}", index, fingerprint.abbreviated());
    }
}

fn print_text(outcomes: &[DomainOutcome]) {
    for outcome in outcomes {
        println!("--------------------------------------");
        println!("Domain: {}", outcome.input);
        println!("Status: {}", outcome.status());
        match &outcome.result {
            Ok(result) => {
                println!("Mode: {} ({})", result.live.mode, result.live.strategy);
                print_snapshot("Live chain", &result.live);
                print_snapshot("Attested chain", &result.attested);
                if let Some(divergence) = result.divergence() {
                    println!("Divergence: {}", describe(&divergence));
                }
            }
            Err(e) => {
                println!("Failure: {}", e.kind());
                println!("Cause: {}", e);
            }
        }
    }
}

fn print_summary(outcomes: &[DomainOutcome]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Domain", "Status", "Live", "Attested", "Detail"]);

    for outcome in outcomes {
        let status = outcome.status();
        let color = match status {
            CheckStatus::Matched => Color::Green,
            CheckStatus::Mismatched => Color::Red,
            CheckStatus::Failed => Color::Yellow,
        };
        let (live, attested, detail) = match &outcome.result {
            Ok(r) => (
                r.live.len().to_string(),
                r.attested.len().to_string(),
                r.divergence().map(|d| describe(&d)).unwrap_or_default(),
            ),
            Err(e) => ("-".to_string(), "-".to_string(), e.to_string()),
        };
        table.add_row(vec![
            Cell::new(&outcome.input),
            Cell::new(status).fg(color),
            Cell::new(live),
            Cell::new(attested),
            Cell::new(detail),
        ]);
    }
    println!("{table}");
}

fn describe(divergence: &Divergence) -> String {
    match divergence {
        Divergence::Position {
            index,
            live,
            attested,
        } => format!(
            "certificate {} differs (live {}, attested {})",
            index,
            live.abbreviated(),
            attested.abbreviated()
        ),
        Divergence::Length { live, attested } => {
            format!("chain length differs (live {}, attested {})", live, attested)
        }
    }
}
