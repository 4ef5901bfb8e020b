//! Trafficlight Daemon
//!
//! Serves the adapter protocol, runs the sweepers and reports results.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trafficlight_daemon::{
    config::OrchestratorConfig, homerunner::HomerunnerClient, http, scenarios, sweeper::Sweeper,
    Orchestrator,
};

#[derive(Parser)]
#[command(name = "trafficlightd")]
#[command(about = "Trafficlight - drives remote Matrix clients through test scenarios")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "trafficlight.toml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long, env = "TRAFFICLIGHT_LISTEN")]
    listen: Option<String>,

    /// Directory for uploaded files
    #[arg(long)]
    upload_folder: Option<PathBuf>,

    /// Homerunner base URL
    #[arg(long, env = "HOMERUNNER_URL")]
    homerunner_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Exit once every test case has finished
    #[arg(long)]
    exit_when_done: bool,
}

impl Cli {
    fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(folder) = &self.upload_folder {
            config.upload_folder = folder.clone();
        }
        if let Some(url) = &self.homerunner_url {
            config.homerunner_url = url.clone();
        }
        if self.exit_when_done {
            config.exit_when_done = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Trafficlight v{}", env!("CARGO_PKG_VERSION"));

    let mut config = OrchestratorConfig::load(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    let provisioner = Arc::new(HomerunnerClient::new(
        config.homerunner_url.clone(),
        config.server_overrides.clone(),
    ));
    let orchestrator = Orchestrator::new(config.clone(), provisioner);
    let loaded = orchestrator.load_scenarios(scenarios::catalog())?;
    info!("Loaded {} scenarios", loaded);

    // Sweepers stop on `cancel`, the HTTP server only after running test cases end
    let cancel = CancellationToken::new();
    let server_shutdown = CancellationToken::new();

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    let server_handle = {
        let orchestrator = orchestrator.clone();
        let server_shutdown = server_shutdown.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, orchestrator, server_shutdown).await {
                error!("HTTP server error: {}", e);
                cancel.cancel();
            }
        })
    };

    let sweeper = Sweeper::new(orchestrator.clone(), cancel.clone());
    let mut sweeper_handles = vec![
        tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run_promoter().await }
        }),
        tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run_reaper().await }
        }),
    ];
    if config.exit_when_done {
        sweeper_handles.push(tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.watch_completion().await }
        }));
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    for handle in sweeper_handles {
        if let Err(e) = handle.await {
            error!("Sweeper error: {}", e);
        }
    }
    orchestrator.shutdown().await;
    server_shutdown.cancel();
    if let Err(e) = server_handle.await {
        error!("HTTP server task error: {}", e);
    }

    for suite in orchestrator.suites() {
        let counts = suite.counts();
        info!(
            "{} ({}): {} passed, {} failed, {} errors, {} skipped of {}",
            suite.scenario_name(),
            suite.id(),
            counts.successes,
            counts.failures,
            counts.errors,
            counts.skipped,
            counts.total
        );
    }

    let totals = orchestrator.totals();
    if totals.all_passed() {
        info!("All {} test cases passed", totals.total);
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            "{} of {} test cases did not pass",
            totals.total - totals.successes,
            totals.total
        );
        Ok(ExitCode::FAILURE)
    }
}
