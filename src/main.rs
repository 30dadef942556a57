use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pogosig_lib::generation::{EnvelopeLocation, GenerationMode, TrackedPosition};
use pogosig_lib::message::{JsonSignatureCodec, RequestPayload};
use pogosig_lib::versions::{VersionDialect, hashing_endpoint, resolve_hashing_version};
use pogosig_lib::{Builder, BuilderOptions, Generator, GeneratorOptions};

/// Operator tool for a hash service: resolve hashing versions and sign request batches.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the hash service, e.g. https://hash.example.com/
    #[arg(short, long)]
    url: String,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the hashing protocol version for an app version
    Versions {
        /// Compact app version, e.g. 5704
        app_version: u32,
        /// `ios` or `client`
        #[arg(short, long, default_value_t = VersionDialect::Ios)]
        dialect: VersionDialect,
    },
    /// Build one unencrypted signature and print it as JSON
    Sign {
        /// Hash service API key
        #[arg(short, long)]
        key: String,
        #[arg(long, default_value_t = 5704)]
        app_version: u32,
        #[arg(short, long, default_value_t = VersionDialect::Ios)]
        dialect: VersionDialect,
        /// Client version used to pick unknown25
        #[arg(long, default_value = "0.57")]
        client_version: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,
        #[arg(long)]
        accuracy: Option<f64>,
        /// Encoded auth ticket, hex
        #[arg(long)]
        auth_ticket: String,
        /// Encoded request, hex. Repeat for each request in the batch.
        #[arg(long = "request")]
        requests: Vec<String>,
        /// Attach generated device telemetry
        #[arg(long)]
        telemetry: bool,
    },
}

/// Logs go to stderr so `sign` output on stdout stays plain JSON.
fn setup_logging(verbosity: &Verbosity<InfoLevel>) {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(&cli.verbose);

    let result = match cli.command {
        Command::Versions { app_version, dialect } => run_versions(&cli.url, app_version, dialect).await,
        Command::Sign {
            key,
            app_version,
            dialect,
            client_version,
            lat,
            lng,
            accuracy,
            auth_ticket,
            requests,
            telemetry,
        } => {
            let inputs = SignInputs {
                key,
                app_version,
                dialect,
                client_version,
                lat,
                lng,
                accuracy,
                auth_ticket,
                requests,
                telemetry,
            };
            run_sign(&cli.url, inputs).await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run_versions(url: &str, app_version: u32, dialect: VersionDialect) -> Result<()> {
    let client = reqwest::Client::new();
    let hashing_version = resolve_hashing_version(&client, url, app_version, dialect)
        .await
        .with_context(|| format!("Failed to resolve hashing version for {}", app_version))?;

    println!("{}", hashing_version);
    println!("{}", hashing_endpoint(url, &hashing_version));
    Ok(())
}

struct SignInputs {
    key: String,
    app_version: u32,
    dialect: VersionDialect,
    client_version: String,
    lat: f64,
    lng: f64,
    accuracy: Option<f64>,
    auth_ticket: String,
    requests: Vec<String>,
    telemetry: bool,
}

async fn run_sign(url: &str, inputs: SignInputs) -> Result<()> {
    let auth_ticket = hex::decode(&inputs.auth_ticket).context("Auth ticket is not valid hex")?;
    let requests = inputs
        .requests
        .iter()
        .map(|r| hex::decode(r).with_context(|| format!("Request is not valid hex: {}", r)))
        .collect::<Result<Vec<_>>>()?;

    let client = reqwest::Client::new();
    let hashing_version = resolve_hashing_version(&client, url, inputs.app_version, inputs.dialect)
        .await
        .context("Failed to resolve hashing version")?;
    let endpoint = hashing_endpoint(url, &hashing_version);

    let mut builder = Builder::new(BuilderOptions {
        version: inputs.client_version,
        codec: Some(Arc::new(JsonSignatureCodec)),
        ..Default::default()
    })?;
    builder.use_remote_hashing(endpoint, inputs.key)?;
    builder.set_location(inputs.lat, inputs.lng, inputs.accuracy);
    builder.set_auth_ticket_bytes(Bytes::from(auth_ticket));

    if inputs.telemetry {
        let generator = Generator::register(
            TrackedPosition::new(inputs.lat, inputs.lng),
            GeneratorOptions {
                mode: GenerationMode::Guess,
                ..Default::default()
            },
        )?;
        let mut envelope = EnvelopeLocation::default();
        let bundle = generator.generate(&mut envelope);
        info!(
            accuracy = envelope.accuracy,
            ms_since_last_location_fix = envelope.ms_since_last_location_fix,
            fixes = bundle.location_fix.len(),
            "Telemetry attached"
        );
        builder.set_fields(bundle.into_fields());
    }

    let payloads: Vec<RequestPayload> = requests.iter().map(|r| RequestPayload::Encoded(r)).collect();
    let signature = builder
        .build_signature(&payloads)
        .await
        .context("Failed to build signature")?;

    if let Some(rate) = builder.rate_info() {
        info!(
            remaining = ?rate.rate_requests_remaining,
            period_end = ?rate.rate_period_end,
            "Hash service rate limit"
        );
    }

    println!("{}", serde_json::to_string_pretty(&signature)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sign_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "pogosig-rs", "--url", "http://localhost/", "sign", "--key", "k", "--lat", "-33.8688", "--lng",
            "151.2093", "--auth-ticket", "00ff", "--request", "0102", "--request", "03",
        ])
        .unwrap();
        match cli.command {
            Command::Sign { lat, requests, dialect, .. } => {
                assert_eq!(lat, -33.8688);
                assert_eq!(requests, vec!["0102", "03"]);
                assert_eq!(dialect, VersionDialect::Ios);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_logging_flags() {
        let cli = Cli::try_parse_from(["pogosig-rs", "-u", "http://h/", "-vv", "versions", "5704"]).unwrap();
        assert_eq!(cli.verbose.tracing_level_filter(), tracing::level_filters::LevelFilter::TRACE);
        assert!(Cli::try_parse_from(["pogosig-rs", "-u", "h", "--log-file", "x.log", "versions", "5704"]).is_err());
    }
}
