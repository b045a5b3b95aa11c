// crates/fleetup-cli/src/main.rs
// ============================================================================
// Module: Fleetup CLI Entry Point
// Description: Command dispatcher for server, migration, and daemon runs.
// Purpose: Provide the operational entry points of the deployment service.
// Dependencies: clap, fleetup-server, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! The `fleetup` binary hosts four commands: `server` (the API process,
//! optionally migrating on startup), `migrate` (schema provisioning, per
//! tenant or global), `storage-daemon` (a standalone expiry GC loop), and
//! `propagate-reporting` (a one-shot reindex walk). All commands share
//! the configuration file and `FLEETUP_*` environment overrides.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetup_core::DataStore;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;
use fleetup_server::FleetupConfig;
use fleetup_server::jobs;
use fleetup_store_sqlite::SqliteDataStore;
use fleetup_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Fleet-wide OTA deployment service.
#[derive(Debug, Parser)]
#[command(name = "fleetup", version, about)]
struct Cli {
    /// Configuration file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Command to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Server {
        /// Run store migrations before serving; failure is fatal.
        #[arg(long)]
        automigrate: bool,
    },
    /// Run store migrations and exit.
    Migrate {
        /// Migrate a single tenant instead of the shared schema.
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Run the expired-upload garbage collector in the foreground.
    StorageDaemon {
        /// Scan interval in seconds.
        #[arg(long)]
        interval: Option<u64>,
        /// Expiry grace jitter in seconds.
        #[arg(long = "time-jitter")]
        time_jitter: Option<u64>,
    },
    /// Re-trigger reporting reindex for stored device-deployments.
    PropagateReporting {
        /// Restrict the walk to one tenant.
        #[arg(long = "tenant-id")]
        tenant_id: Option<String>,
        /// Batch calls per second; 0 means unthrottled.
        #[arg(long = "rate-limit", default_value_t = 0)]
        rate_limit: u32,
        /// Count what would be sent without calling workflows.
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let config = match FleetupConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };
    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!(error = message.as_str(), "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the selected command.
async fn run(command: Command, config: FleetupConfig) -> Result<(), String> {
    match command {
        Command::Server {
            automigrate,
        } => {
            let state = fleetup_server::build_state(config).await?;
            if automigrate {
                let scope = RequestScope::background(TenantId::default_tenant());
                state
                    .store
                    .migrate(&scope)
                    .await
                    .map_err(|err| format!("automigrate failed: {err}"))?;
                info!("store migrated");
            }
            fleetup_server::serve(state).await
        }
        Command::Migrate {
            tenant,
        } => {
            let store = open_store(&config)?;
            let tenant = tenant.map_or_else(TenantId::default_tenant, TenantId::new);
            let scope = RequestScope::background(tenant.clone());
            store.migrate(&scope).await.map_err(|err| format!("migrate failed: {err}"))?;
            info!(tenant = tenant.as_str(), "store migrated");
            Ok(())
        }
        Command::StorageDaemon {
            interval,
            time_jitter,
        } => {
            let state = fleetup_server::build_state(config).await?;
            let interval = Duration::from_secs(
                interval.unwrap_or(state.config.storage_daemon.interval_seconds),
            );
            let jitter = Duration::from_secs(
                time_jitter.unwrap_or(state.config.storage_daemon.time_jitter_seconds),
            );
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let daemon = {
                let state = state.clone();
                tokio::spawn(async move {
                    jobs::storage_daemon(
                        state.store.as_ref(),
                        state.objects.as_ref(),
                        interval,
                        jitter,
                        shutdown_rx,
                    )
                    .await;
                })
            };
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(true);
            daemon.await.map_err(|err| format!("daemon join failed: {err}"))
        }
        Command::PropagateReporting {
            tenant_id,
            rate_limit,
            dry_run,
        } => {
            let state = fleetup_server::build_state(config).await?;
            let tenant = tenant_id.map_or_else(TenantId::default_tenant, TenantId::new);
            let propagated = jobs::propagate_reporting(
                state.store.as_ref(),
                state.workflows.as_ref(),
                tenant,
                rate_limit,
                dry_run,
            )
            .await
            .map_err(|err| format!("propagation failed: {err}"))?;
            info!(propagated, dry_run, "propagation complete");
            Ok(())
        }
    }
}

/// Opens the metadata store without the rest of the server state.
fn open_store(config: &FleetupConfig) -> Result<SqliteDataStore, String> {
    SqliteDataStore::open(&SqliteStoreConfig::new(config.store.path.clone()))
        .map_err(|err| format!("store open failed: {err}"))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;
    use super::Command;

    #[test]
    fn server_command_parses_with_automigrate() {
        let cli = Cli::parse_from(["fleetup", "server", "--automigrate"]);
        assert!(matches!(
            cli.command,
            Command::Server {
                automigrate: true
            }
        ));
    }

    #[test]
    fn storage_daemon_accepts_interval_flags() {
        let cli = Cli::parse_from([
            "fleetup",
            "storage-daemon",
            "--interval",
            "60",
            "--time-jitter",
            "5",
        ]);
        assert!(matches!(
            cli.command,
            Command::StorageDaemon {
                interval: Some(60),
                time_jitter: Some(5)
            }
        ));
    }

    #[test]
    fn propagate_reporting_accepts_tenant_and_limits() {
        let cli = Cli::parse_from([
            "fleetup",
            "propagate-reporting",
            "--tenant-id",
            "acme",
            "--rate-limit",
            "10",
            "--dry-run",
        ]);
        match cli.command {
            Command::PropagateReporting {
                tenant_id,
                rate_limit,
                dry_run,
            } => {
                assert_eq!(tenant_id.as_deref(), Some("acme"));
                assert_eq!(rate_limit, 10);
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["fleetup", "migrate", "--config", "/etc/fleetup.toml"]);
        assert!(cli.config.is_some());
    }
}
