//! Audit Journal Verifier
//!
//! Check a JSON-lines audit journal for edits, removed rows and truncation.
//!
//! Usage:
//!   audit-verify <journal.jsonl> [--from <seq>] [--to <seq>] [--expected-head <seq>:<hex>] [--format json]
//!
//! Exits 0 when the journal verifies, 2 when a break is found.

use carevault_audit::{scan_store, AuditStore, ChainHash, ChainHead, JsonlAuditStore};
use carevault_shared::telemetry::init_logging;
use carevault_shared::LoggingConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "audit-verify")]
#[command(author = "CareVault")]
#[command(version = "0.1.0")]
#[command(about = "Verify a CareVault audit journal", long_about = None)]
struct Cli {
    /// Path to the JSON-lines journal
    journal: PathBuf,

    /// First sequence number to check
    #[arg(long, default_value = "1")]
    from: u64,

    /// Last sequence number to check (defaults to the journal tail)
    #[arg(long)]
    to: Option<u64>,

    /// Head recorded elsewhere, as `<sequence>:<hex hash>`. Without it a
    /// truncated tail cannot be detected.
    #[arg(long)]
    expected_head: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Log filter directive
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_head(value: &str) -> Result<ChainHead, String> {
    let (seq, hash) = value
        .split_once(':')
        .ok_or_else(|| "expected <sequence>:<hex hash>".to_string())?;
    let sequence_no = seq
        .parse::<u64>()
        .map_err(|e| format!("invalid sequence number: {}", e))?;
    Ok(ChainHead {
        sequence_no,
        hash: ChainHash::from_hex(hash)?,
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig {
        level: cli.log_level.clone(),
        ..LoggingConfig::default()
    })?;

    let store = JsonlAuditStore::open(&cli.journal).await?;
    let head = match &cli.expected_head {
        Some(value) => Some(parse_head(value)?),
        None => store.head().await?,
    };
    let to = cli.to.or(head.map(|h| h.sequence_no)).unwrap_or(0);

    if to < cli.from {
        match cli.format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "verified": true, "entries": 0 })),
            OutputFormat::Text => println!("journal is empty in range {}..={}", cli.from, to),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let found = scan_store(&store, cli.from, to, head).await?;
    match cli.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "verified": found.is_none(),
                "from": cli.from,
                "to": to,
                "break": found,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => match &found {
            Some(chain_break) => println!("BROKEN: {}", chain_break),
            None => println!("OK: entries {}..={} verified", cli.from, to),
        },
    }

    Ok(if found.is_some() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
