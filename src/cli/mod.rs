use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use costledger::collectors::{CollectorRegistry, EnvCredentialSource};
use costledger::config::{CollectorKind, Config};
use costledger::services::{CollectionOutcome, CollectionService, SystemClock};
use costledger::store::JsonFileStore;
use costledger::types::{AnomalyEvent, AnomalyKind, CollectionStatus, LedgerRecord, Severity};

/// Idempotent multi-provider cost ledger with spike detection
#[derive(Parser)]
#[command(name = "costledger")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.costledger/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect and reconcile costs for one service, or all of them
    Collect {
        /// Service id to collect
        #[arg(required_unless_present = "all")]
        service: Option<String>,

        /// Collect every configured service
        #[arg(long, conflicts_with = "service")]
        all: bool,
    },

    /// Show cost and resource spikes for the latest day
    Anomalies {
        /// Only scan this service
        #[arg(long)]
        service: Option<String>,

        /// Spike threshold in percent (default from config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the last collection outcome per service
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show ledger records for a service
    Ledger {
        service: String,

        /// Trailing days to show, including today
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured services
    Services,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load(self.config.as_deref()).context("failed to load config")?;

        if let Commands::Services = self.command {
            for service in &config.services {
                println!("{}", format_service(&service.id, &service.kind));
            }
            return Ok(());
        }

        let service = Arc::new(build_service(&config)?);

        match self.command {
            Commands::Collect { service: id, all } => {
                if all {
                    run_collect_all(&service).await
                } else {
                    // clap guarantees a service id when --all is absent
                    let id = id.unwrap_or_default();
                    let outcome = service.trigger_collection(&id).await?;
                    println!("{}", format_outcome(&outcome));
                    Ok(())
                }
            }
            Commands::Anomalies {
                service: id,
                threshold,
                json,
            } => {
                let events = service.get_anomalies(id.as_deref(), threshold).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&events)?);
                } else if events.is_empty() {
                    println!("No anomalies detected");
                } else {
                    for event in &events {
                        println!("{}", format_anomaly(event));
                    }
                }
                Ok(())
            }
            Commands::Status { json } => {
                let statuses = service.get_collection_statuses().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&statuses)?);
                } else if statuses.is_empty() {
                    println!("No collections recorded yet");
                } else {
                    for status in statuses.values() {
                        println!("{}", format_status(status));
                    }
                }
                Ok(())
            }
            Commands::Ledger {
                service: id,
                days,
                json,
            } => {
                let records = service.ledger_window(&id, days).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else if records.is_empty() {
                    println!("No ledger records for {} in the last {} days", id, days);
                } else {
                    for record in &records {
                        println!("{}", format_record(record));
                    }
                }
                Ok(())
            }
            Commands::Services => Ok(()),
        }
    }
}

fn build_service(config: &Config) -> anyhow::Result<CollectionService> {
    let data_dir = config.data_dir()?;
    let store = Arc::new(
        JsonFileStore::new(data_dir.clone())
            .with_context(|| format!("failed to open ledger at {}", data_dir.display()))?,
    );
    let registry = CollectorRegistry::from_config(config)?;

    Ok(CollectionService::new(
        registry,
        Arc::new(EnvCredentialSource),
        store.clone(),
        store,
        Arc::new(SystemClock),
        config.anomaly.clone(),
    ))
}

async fn run_collect_all(service: &Arc<CollectionService>) -> anyhow::Result<()> {
    let results = service.collect_all().await;
    if results.is_empty() {
        println!("No services configured");
        return Ok(());
    }

    let mut failed = 0;
    for (id, result) in &results {
        match result {
            Ok(outcome) => println!("{}", format_outcome(outcome)),
            Err(e) => {
                failed += 1;
                println!("{:<16} FAILED  {}", id, e);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} collections failed", failed, results.len());
    }
    Ok(())
}

fn format_service(id: &str, kind: &CollectorKind) -> String {
    match kind {
        CollectorKind::FileExport { path } => {
            format!("{:<16} file_export  {}", id, path.display())
        }
        CollectorKind::HttpJson { url, .. } => format!("{:<16} http_json    {}", id, url),
    }
}

fn format_outcome(outcome: &CollectionOutcome) -> String {
    let mut line = format!(
        "{:<16} collected {} entries: {} new, {} updated",
        outcome.service_id, outcome.costs_collected, outcome.new_records, outcome.updated_records
    );
    if let Some(warning) = &outcome.warning {
        line.push_str(&format!(" (warning: {})", warning));
    }
    line
}

fn format_anomaly(event: &AnomalyEvent) -> String {
    let severity = match event.severity {
        Severity::High => "HIGH",
        Severity::Medium => "MEDIUM",
    };
    let subject = match &event.kind {
        AnomalyKind::CostSpike => "total".to_string(),
        AnomalyKind::ResourceSpike {
            resource_id,
            resource_name,
            resource_type,
        } => format!("{} ({}, {})", resource_id, resource_name, resource_type),
    };
    format!(
        "[{}] {} {} {}: {:.2} vs avg {:.2} (+{:.1}%)",
        severity,
        event.service_id,
        event.timestamp.format("%Y-%m-%d"),
        subject,
        event.current_cost,
        event.average_cost,
        event.percent_change
    )
}

fn format_status(status: &CollectionStatus) -> String {
    let last_run = status.last_run.format("%Y-%m-%d %H:%M UTC");
    match &status.error {
        Some(error) => format!("{:<16} error    {}  {}", status.service_id, last_run, error),
        None => {
            let mut line = format!(
                "{:<16} success  {}  {} entries",
                status.service_id, last_run, status.costs_collected
            );
            if let Some(warning) = &status.warning {
                line.push_str(&format!(" (warning: {})", warning));
            }
            line
        }
    }
}

fn format_record(record: &LedgerRecord) -> String {
    format!(
        "{}  {:>12.2} {}  {} resources",
        record.date,
        record.total_cost,
        record.currency,
        record.resources.len()
    )
}
