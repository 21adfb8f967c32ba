//! certchain: command-line front end for the certificate registry.
//!
//! Usage:
//!   certchain --config path/to/certchain.toml <command>
//!
//! Every command prints its result as JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use certchain_core::CertificateAttributes;
use certchain_registry::{
    ApproveInput, CertificateStatus, ListFilter, Registry, RegistryConfig, RejectInput,
    RequestInput, Result, RevokeInput,
};

/// Academic certificate registry with ledger anchoring.
#[derive(Parser, Debug)]
#[command(name = "certchain")]
#[command(about = "Request, approve, issue, revoke and verify academic certificates")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CERTCHAIN_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a certificate request
    Request {
        #[arg(long)]
        subject_name: String,
        #[arg(long)]
        course_name: String,
        /// YYYY-MM-DD
        #[arg(long)]
        completion_date: String,
        #[arg(long)]
        issuer_name: String,
        #[arg(long)]
        subject_id: String,
        #[arg(long)]
        issuer_id: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Approve a request, optionally archiving the certificate document
    Approve {
        id: String,
        #[arg(long)]
        document: Option<PathBuf>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Reject a request
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Anchor an approved certificate on the ledger
    Issue {
        id: String,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Revoke an issued certificate
    Revoke {
        id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        revoked_by: String,
    },
    /// Verify a certificate, optionally against a presented document
    Verify {
        id: String,
        #[arg(long)]
        document: Option<PathBuf>,
    },
    /// Show a certificate record and its revocation, if any
    Show { id: String },
    /// List certificate records, newest first
    List {
        #[arg(long)]
        subject_id: Option<String>,
        #[arg(long)]
        issuer_id: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<CertificateStatus>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
    /// Show the audit trail and whether its hash chain is intact
    History { id: String },
    /// Write the archived document to a file
    Document {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_status(s: &str) -> std::result::Result<CertificateStatus, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_uppercase()))
        .map_err(|_| format!("unknown status {s:?}"))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli).await.map_err(|e| e.into())
}

async fn run(cli: Cli) -> Result<()> {
    let config = RegistryConfig::load(&cli.config)?;
    tracing::debug!(
        store = %config.store.path.display(),
        ledger = %config.ledger.rpc_url,
        registry_contract = %config.ledger.registry_contract,
        content_store = %config.content_store.api_url,
        "Loaded configuration"
    );
    let registry = Registry::from_config(&config)?;

    match cli.command {
        Command::Request {
            subject_name,
            course_name,
            completion_date,
            issuer_name,
            subject_id,
            issuer_id,
            actor,
        } => {
            let attributes =
                CertificateAttributes::new(subject_name, course_name, completion_date, issuer_name)?;
            let record = registry
                .lifecycle
                .request(RequestInput {
                    attributes,
                    subject_id,
                    issuer_id,
                    actor,
                })
                .await?;
            print_json(&record)
        }
        Command::Approve {
            id,
            document,
            actor,
        } => {
            let document = document.map(std::fs::read).transpose()?;
            let record = registry
                .lifecycle
                .approve(&id, ApproveInput { document, actor })
                .await?;
            print_json(&record)
        }
        Command::Reject { id, reason, actor } => {
            let record = registry
                .lifecycle
                .reject(&id, RejectInput { reason, actor })
                .await?;
            print_json(&record)
        }
        Command::Issue { id, actor } => print_json(&registry.lifecycle.issue(&id, actor).await?),
        Command::Revoke {
            id,
            reason,
            revoked_by,
        } => {
            let record = registry
                .lifecycle
                .revoke(&id, RevokeInput { reason, revoked_by })
                .await?;
            print_json(&record)
        }
        Command::Verify { id, document } => {
            let document = document.map(std::fs::read).transpose()?;
            let result = registry.verifier.verify(&id, document.as_deref()).await?;
            print_json(&result)
        }
        Command::Show { id } => {
            let record = registry.lifecycle.get(&id)?;
            let revocation = registry.lifecycle.revocation(&id)?;
            print_json(&serde_json::json!({
                "certificate": record,
                "revocation": revocation,
            }))
        }
        Command::List {
            subject_id,
            issuer_id,
            status,
            limit,
            offset,
        } => {
            let records = registry.lifecycle.list(&ListFilter {
                subject_id,
                issuer_id,
                status,
                limit,
                offset,
            })?;
            print_json(&records)
        }
        Command::History { id } => {
            let events = registry.lifecycle.history(&id)?;
            let chain_valid = registry.lifecycle.verify_history(&id)?;
            print_json(&serde_json::json!({
                "certificateId": id,
                "chainValid": chain_valid,
                "events": events,
            }))
        }
        Command::Document { id, out } => {
            let Some(bytes) = registry.verifier.retrieve_document(&id).await? else {
                return print_json(&serde_json::json!({
                    "certificateId": id,
                    "document": null,
                }));
            };
            std::fs::write(&out, &bytes)?;
            print_json(&serde_json::json!({
                "certificateId": id,
                "path": out.display().to_string(),
                "bytes": bytes.len(),
            }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
