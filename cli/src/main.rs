//! WARDEN command line.
//!
//! Usage:
//!   warden report --ledger-db warden.db --policies policies.toml
//!   warden report --gateway-url http://gateway:8080 --lookback 7d --json
//!   warden verify --ledger-db warden.db --timeout-secs 60
//!   warden evaluate --policies policies.toml --resource-type database \
//!       --resource-id prod-db --env prod --action write --actor sre-agent --role sre
//!   warden approvals list --ledger-db warden.db
//!
//! `report` and `verify` exit with the status tier: 0 OK, 1 DEGRADED or
//! unavailable, 2 ALERTS, 3 CHAIN_INVALID.

mod commands;

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use warden_contracts::request::{ActionClass, Origin};
use warden_report::parse_duration;

// ── CLI definition ────────────────────────────────────────────────────────────

/// WARDEN: policy enforcement and audit for agent access to infrastructure.
#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "WARDEN governance tooling",
    long_about = "Audits the WARDEN ledger, verifies its hash chain, evaluates\n\
                  policies offline, and manages pending approvals."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the compliance report over the lookback window.
    Report(ReportArgs),
    /// Verify the full ledger hash chain.
    Verify(VerifyArgs),
    /// Evaluate one request against a policy file and print the verdict.
    Evaluate(EvaluateArgs),
    /// Inspect and resolve pending approvals.
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommand,
    },
}

/// Where the ledger lives. Flags override the config file.
#[derive(Args, Clone, Default)]
struct SourceArgs {
    /// SQLite ledger file.
    #[arg(long, conflicts_with = "gateway_url")]
    ledger_db: Option<PathBuf>,
    /// Gateway base URL; the ledger is read over HTTP.
    #[arg(long)]
    gateway_url: Option<String>,
}

#[derive(Args)]
struct ReportArgs {
    /// Reporter config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Policy file for the policy overview.
    #[arg(long)]
    policies: Option<PathBuf>,
    #[command(flatten)]
    source: SourceArgs,
    /// Window length, e.g. `24h` or `7d`.
    #[arg(long, value_parser = parse_duration)]
    lookback: Option<Duration>,
    /// POST the JSON report to this URL.
    #[arg(long)]
    webhook: Option<String>,
    /// Render the report but do not post it.
    #[arg(long)]
    dry_run: bool,
    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// Give up after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Read,
    Write,
    Destructive,
}

impl From<ActionArg> for ActionClass {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Read => ActionClass::Read,
            ActionArg::Write => ActionClass::Write,
            ActionArg::Destructive => ActionClass::Destructive,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OriginArg {
    Agent,
    Direct,
}

impl From<OriginArg> for Origin {
    fn from(arg: OriginArg) -> Self {
        match arg {
            OriginArg::Agent => Origin::AgentMediated,
            OriginArg::Direct => Origin::Direct,
        }
    }
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long)]
    policies: PathBuf,
    #[arg(long)]
    resource_type: String,
    #[arg(long)]
    resource_id: String,
    #[arg(long)]
    env: String,
    #[arg(long, value_enum)]
    action: ActionArg,
    #[arg(long)]
    actor: String,
    #[arg(long)]
    role: String,
    #[arg(long, default_value = "cli")]
    trace: String,
    #[arg(long, value_enum, default_value_t = OriginArg::Direct)]
    origin: OriginArg,
    /// Evaluate as of this RFC 3339 instant instead of now.
    #[arg(long)]
    at: Option<DateTime<Utc>>,
    /// Print the verdict as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DbArg {
    /// SQLite file holding the ledger and the approvals.
    #[arg(long)]
    ledger_db: PathBuf,
}

#[derive(Args)]
struct ResolveArgs {
    #[command(flatten)]
    db: DbArg,
    /// Approval id.
    id: String,
    /// Who is resolving.
    #[arg(long)]
    resolver: String,
    #[arg(long)]
    note: Option<String>,
}

#[derive(Subcommand)]
enum ApprovalCommand {
    /// List pending approvals (all records with `--all`).
    List {
        #[command(flatten)]
        db: DbArg,
        #[arg(long)]
        all: bool,
    },
    /// Approve a pending request.
    Approve(ResolveArgs),
    /// Reject a pending request.
    Reject(ResolveArgs),
    /// Expire one approval, or every approval past its TTL when no id is given.
    Expire {
        #[command(flatten)]
        db: DbArg,
        id: Option<String>,
        #[arg(long, value_parser = parse_duration, default_value = "1h")]
        ttl: Duration,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Logs go to stderr; RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Report(args) => commands::report(args),
        Command::Verify(args) => commands::verify(args),
        Command::Evaluate(args) => commands::evaluate(args),
        Command::Approvals { command } => commands::approvals(command),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("warden: {}", e);
            std::process::exit(1);
        }
    }
}
