use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tile_capture::ScheduleError;
use tile_capture::models::GridCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use traffic_sync::config::{AppConfig, load_config_path};
use traffic_sync::db::migrate;
use traffic_sync::pipeline::Pipeline;

#[derive(Parser)]
#[command(version, about = "Traffic tile capture, analysis and replication")]
struct Cli {
    /// TOML configuration; built-in defaults when omitted.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Capture one batch and analyze it.
    Capture,
    /// Classify, store and compose tiles whose names contain PREFIX.
    Analyze {
        #[arg(long)]
        prefix: String,
    },
    /// Cut one cell out of every stored mosaic.
    Isolate {
        /// Cell as `x,y`.
        #[arg(long, value_parser = parse_cell)]
        cell: GridCell,
    },
    /// Copy pending rows to the remote store.
    Sync,
    /// Apply pending migrations to a store without syncing.
    Migrate {
        /// `postgres://` URL or SQLite path; `REMOTE_DATABASE_URL` when omitted.
        #[arg(long)]
        url: Option<String>,
    },
    /// Capture on a fixed interval with background replication (default).
    Run {
        /// Skip replication.
        #[arg(long)]
        no_sync: bool,
    },
}

fn parse_cell(raw: &str) -> Result<GridCell, String> {
    let (x, y) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected `x,y`, got `{raw}`"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("bad coordinate `{v}`: {e}"))
    };
    Ok(GridCell {
        x: parse(x)?,
        y: parse(y)?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("traffic_sync=info,tile_capture=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_path(path)?,
        None => AppConfig::default(),
    };
    let pipeline = Pipeline::open(config)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });

    match cli.cmd.unwrap_or(Cmd::Run { no_sync: false }) {
        Cmd::Capture => {
            let renderer = pipeline.http_renderer()?;
            let mut skip = pipeline.config().capture.skip_policy();
            let report = match pipeline.capture_cycle(renderer, &mut skip, &cancel).await {
                Ok(report) => report,
                Err(ScheduleError::Cancelled) => {
                    warn!("capture cancelled before any tile");
                    return Ok(());
                }
                Err(e) => return Err(e).context("capture failed"),
            };
            let analyzed = pipeline.analyze_batch(&report.stamp.to_string()).await?;
            info!(
                stamp = %report.stamp,
                captured = report.captured.len(),
                skipped = report.skipped.len(),
                failed = report.failures.len(),
                analyzed = analyzed.analyzed,
                "capture cycle done"
            );
        }
        Cmd::Analyze { prefix } => {
            let report = pipeline.analyze_batch(&prefix).await?;
            info!(analyzed = report.analyzed, failed = report.failed, "analyze done");
        }
        Cmd::Isolate { cell } => {
            let report = pipeline.isolate(cell, &cancel).await?;
            if !report.failures.is_empty() {
                warn!(failed = report.failures.len(), "some mosaics could not be isolated");
            }
        }
        Cmd::Sync => {
            let replicator = pipeline.remote_replicator().await?;
            pipeline.sync_all(&replicator, &cancel).await?;
        }
        Cmd::Migrate { url } => {
            let url = match url {
                Some(url) => url,
                None => AppConfig::remote_database_url()?,
            };
            tokio::task::spawn_blocking(move || migrate::run_all(&url))
                .await?
                .context("migrate store")?;
            info!("migrations applied");
        }
        Cmd::Run { no_sync } => {
            let renderer = pipeline.http_renderer()?;
            let replicator = if no_sync {
                None
            } else {
                Some(pipeline.remote_replicator().await?)
            };
            pipeline.run_periodic(renderer, replicator, cancel).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_takes_an_optional_url() {
        let cli = Cli::try_parse_from(["traffic_sync", "migrate", "--url", "remote.db"]).unwrap();
        assert!(matches!(cli.cmd, Some(Cmd::Migrate { url: Some(ref u) }) if u == "remote.db"));

        let cli = Cli::try_parse_from(["traffic_sync", "migrate"]).unwrap();
        assert!(matches!(cli.cmd, Some(Cmd::Migrate { url: None })));
    }

    #[test]
    fn cell_is_parsed_from_x_comma_y() {
        assert_eq!(parse_cell("3, 7").unwrap(), GridCell { x: 3, y: 7 });
        assert!(parse_cell("3").is_err());
    }
}
