//! `bulwark`: validate services files and probe upstreams from the shell.
//!
//! ```text
//! bulwark validate --config services.yaml
//! bulwark health   --config services.yaml --json
//! bulwark request  --config services.yaml --upstream billing /invoices/42
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default filter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bulwark_core::{CallDescriptor, Method, OperationCategory};
use bulwark_runtime::{ReqwestTransport, ServicesConfig, UpstreamRegistry};

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(about = "Resilient HTTP client toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a services file and print the effective policies
    Validate {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Probe every upstream's health path
    Health {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Send one call through an upstream's client
    Request {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(short, long)]
        upstream: String,

        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,

        /// Operation category; defaults by method
        #[arg(long)]
        category: Option<OperationCategory>,

        /// Attempt timeout, e.g. `2s` or `500ms`
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Extra header as `Name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Path relative to the upstream's base URL, or an absolute URL
        url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct PolicyRow {
    category: OperationCategory,
    timeout: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct UpstreamSummary {
    name: String,
    base_url: String,
    max_concurrent: usize,
    failure_threshold: u32,
    reset_timeout: String,
    monitoring_period: String,
    policies: Vec<PolicyRow>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { config, format } => validate(&config, format),
        Commands::Health { config, format } => health(&config, format).await,
        Commands::Request {
            config,
            upstream,
            method,
            category,
            timeout,
            headers,
            data,
            format,
            url,
        } => {
            let mut builder = CallDescriptor::builder(method, url);
            if let Some(category) = category {
                builder = builder.category(category);
            }
            if let Some(timeout) = timeout {
                builder = builder.timeout_override(timeout);
            }
            for header in &headers {
                let (name, value) = parse_header(header)?;
                builder = builder.header(name, value);
            }
            if let Some(data) = data {
                builder = builder.body(data);
            }
            request(&config, &upstream, builder.build(), format).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "bulwark=debug,bulwark_core=debug,bulwark_runtime=debug"
    } else {
        "bulwark=info,bulwark_core=info,bulwark_runtime=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load(path: &Path) -> Result<ServicesConfig> {
    ServicesConfig::from_yaml_file(path)
        .with_context(|| format!("invalid services file {}", path.display()))
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("header must look like 'Name: value', got '{}'", raw),
    }
}

fn validate(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load(path)?;

    let mut summaries = Vec::with_capacity(config.upstreams.len());
    for upstream in &config.upstreams {
        let table = upstream.policy_table()?;
        summaries.push(UpstreamSummary {
            name: upstream.name.clone(),
            base_url: upstream.base_url.clone(),
            max_concurrent: upstream.max_concurrent,
            failure_threshold: upstream.circuit_breaker.failure_threshold,
            reset_timeout: humantime::format_duration(upstream.circuit_breaker.reset_timeout)
                .to_string(),
            monitoring_period: humantime::format_duration(
                upstream.circuit_breaker.monitoring_period,
            )
            .to_string(),
            policies: table
                .iter()
                .map(|(category, policy)| PolicyRow {
                    category,
                    timeout: humantime::format_duration(policy.timeout).to_string(),
                    max_retries: policy.max_retries,
                })
                .collect(),
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summaries)?),
        OutputFormat::Text => {
            println!("{}: {} upstream(s) OK", path.display(), summaries.len());
            for summary in &summaries {
                println!();
                println!("{} -> {}", summary.name, summary.base_url);
                println!(
                    "  max_concurrent={} breaker: threshold={} reset={} window={}",
                    summary.max_concurrent,
                    summary.failure_threshold,
                    summary.reset_timeout,
                    summary.monitoring_period
                );
                for row in &summary.policies {
                    println!(
                        "  {:<15} timeout={:<6} retries={}",
                        row.category.as_str(),
                        row.timeout,
                        row.max_retries
                    );
                }
            }
        }
    }
    Ok(())
}

async fn health(path: &Path, format: OutputFormat) -> Result<()> {
    let config = load(path)?;
    let registry = UpstreamRegistry::from_config(&config, Arc::new(ReqwestTransport::new()?))?;

    let results = registry.health_check_all().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => {
            for (name, healthy) in &results {
                println!("{:<20} {}", name, if *healthy { "healthy" } else { "UNHEALTHY" });
            }
        }
    }

    let unhealthy = results.values().filter(|healthy| !**healthy).count();
    if unhealthy > 0 {
        bail!("{} of {} upstream(s) unhealthy", unhealthy, results.len());
    }
    Ok(())
}

async fn request(
    path: &Path,
    upstream: &str,
    call: CallDescriptor,
    format: OutputFormat,
) -> Result<()> {
    let config = load(path)?;
    let registry = UpstreamRegistry::from_config(&config, Arc::new(ReqwestTransport::new()?))?;
    let client = registry.client(upstream)?;

    tracing::debug!(upstream, method = %call.method, url = %call.url, "Sending request");
    let result = client.request(call).await;
    let snapshot = client.snapshot();

    match result {
        Ok(response) => {
            match format {
                OutputFormat::Json => {
                    let body = response
                        .json::<serde_json::Value>()
                        .unwrap_or_else(|_| serde_json::Value::String(response.text()));
                    let out = serde_json::json!({
                        "status": response.status(),
                        "body": body,
                        "upstream": snapshot,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                OutputFormat::Text => {
                    println!("HTTP {}", response.status());
                    println!("{}", response.text());
                }
            }
            Ok(())
        }
        Err(error) => {
            if format == OutputFormat::Json {
                let out = serde_json::json!({
                    "error": {
                        "kind": error.kind(),
                        "status": error.http_status(),
                        "message": error.message(),
                        "retryable": error.is_retryable(),
                    },
                    "upstream": snapshot,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            Err(error).with_context(|| format!("request to {} failed", upstream))
        }
    }
}
