//! orgsync - reconcile an identity directory snapshot with the activation ledger
//!
//! Loads a directory snapshot (JSON) as the identity backend, opens the
//! filesystem ledger configured through `ORGSYNC_*` variables and runs one
//! reconciliation operation. The run report is printed to stdout as JSON.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod error;
mod listeners;
mod logging;

use error::{CliError, CliResult};
use orgsync_engine::{
    DirectorySnapshot, EventType, FsLedger, GroupId, ListenerRegistry, OrgSyncConfig,
    OrgSyncEngine, SyncReport, Username,
};

/// orgsync - organization model reconciliation
#[derive(Parser)]
#[command(name = "orgsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory snapshot used as the identity backend
    #[arg(long, global = true, env = "ORGSYNC_SNAPSHOT", default_value = "directory.json")]
    snapshot: PathBuf,

    /// Listener declarations (JSON array); defaults to one logging listener per capability
    #[arg(long, global = true, env = "ORGSYNC_LISTENERS")]
    listeners: Option<PathBuf>,

    /// Log filter directive, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_filter: String,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full reconciliation of groups then users
    SyncAll,

    /// Reconcile every group for one event
    SyncGroups {
        /// ADDED, UPDATED or DELETED
        event: EventType,
    },

    /// Reconcile one group
    SyncGroup { group_id: GroupId, event: EventType },

    /// Reconcile every user for one event
    SyncUsers { event: EventType },

    /// Reconcile one user with profile and memberships
    SyncUser { username: Username, event: EventType },

    /// Reconcile the memberships of a user in one group
    SyncMembership {
        username: Username,
        group_id: GroupId,
        event: EventType,
    },

    /// Report whether a user is recorded as integrated
    IsUserSynced { username: Username },

    /// Startup reconciliation (honours ORGSYNC_SYNCHRONIZE_GROUPS)
    Startup,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&cli.log_filter, cli.json_logs) {
        e.print();
        std::process::exit(e.exit_code());
    }

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "orgsync failed");
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = OrgSyncConfig::from_env()?;
    let engine = build_engine(&cli, config).await?;

    let report = match cli.command {
        Commands::SyncAll => engine.sync_all().await?,
        Commands::SyncGroups { event } => engine.sync_all_groups(event).await?,
        Commands::SyncGroup { group_id, event } => engine.sync_group(&group_id, event).await?,
        Commands::SyncUsers { event } => engine.sync_all_users(event).await?,
        Commands::SyncUser { username, event } => engine.sync_user(&username, event).await?,
        Commands::SyncMembership {
            username,
            group_id,
            event,
        } => engine.sync_membership(&username, &group_id, event).await?,
        Commands::IsUserSynced { username } => {
            let synced = engine.is_user_synced(&username).await?;
            println!("{}", serde_json::json!({ "username": username, "synced": synced }));
            return Ok(());
        }
        Commands::Startup => engine.startup().await,
    };

    print_report(&report)
}

async fn build_engine(cli: &Cli, config: OrgSyncConfig) -> CliResult<OrgSyncEngine> {
    let backend = DirectorySnapshot::load(&cli.snapshot).await?.into_backend();

    let mut registry = ListenerRegistry::new();
    match &cli.listeners {
        Some(path) => listeners::register_declared(&mut registry, path).await?,
        None => listeners::register_defaults(&mut registry),
    }

    let ledger = Arc::new(FsLedger::new(&config.ledger_root));
    tracing::info!(
        snapshot = %cli.snapshot.display(),
        ledger_root = %config.ledger_root.display(),
        workspace = %config.workspace,
        "Opening directory snapshot and ledger"
    );

    Ok(OrgSyncEngine::builder(config)
        .backend(Arc::new(backend))
        .ledger_store(ledger)
        .registry(registry)
        .build()?)
}

fn print_report(report: &SyncReport) -> CliResult<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| CliError::Output(e.to_string()))?;
    println!("{json}");

    let failures = report.listener_failures.len() + report.item_failures.len();
    if failures > 0 {
        return Err(CliError::CompletedWithFailures(failures));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_membership() {
        let cli = Cli::try_parse_from([
            "orgsync",
            "--snapshot",
            "dir.json",
            "sync-membership",
            "john",
            "/platform/users",
            "added",
        ])
        .unwrap();
        assert_eq!(cli.snapshot, PathBuf::from("dir.json"));
        match cli.command {
            Commands::SyncMembership {
                username,
                group_id,
                event,
            } => {
                assert_eq!(username.as_str(), "john");
                assert_eq!(group_id.as_str(), "/platform/users");
                assert_eq!(event, EventType::Added);
            }
            _ => panic!("expected sync-membership"),
        }
    }

    #[test]
    fn test_rejects_malformed_group() {
        assert!(Cli::try_parse_from(["orgsync", "sync-group", "no-leading-slash", "ADDED"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_event() {
        assert!(Cli::try_parse_from(["orgsync", "sync-users", "RENAMED"]).is_err());
    }
}
