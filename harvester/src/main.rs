use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use tokio_util::sync::CancellationToken;

use harvester::cli::Cli;
use harvester::config::{init_logger, load_environment, Settings};
use harvester::crawler::run_crawl;
use harvester::services::collector::HttpCollector;
use harvester::services::scheduler::{cancel_on_ctrl_c, run_scheduled};

#[tokio::main]
async fn main() -> ExitCode {
    load_environment();
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_overrides(&cli);
    settings.validate()?;

    if cli.close_collector {
        let collector = HttpCollector::new(&settings.collector, &settings.search.base_url)?;
        collector.shutdown().await.context("Failed to close collector session")?;
        return Ok(0);
    }

    if cli.login {
        let collector = HttpCollector::new(&settings.collector, &settings.search.base_url)?;
        collector
            .login(Duration::from_secs(settings.collector.login_wait_secs))
            .await
            .context("Login failed")?;
        return Ok(0);
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    if settings.schedule.enabled {
        run_scheduled(settings, cancel).await?;
        return Ok(0);
    }

    info!("Running a single crawl");
    let summary = run_crawl(&settings, &cancel).await?;
    Ok(summary.exit_code())
}
