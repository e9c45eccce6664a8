//! actpoll: activity-log polling coordinator binary.
//! Single process embedding the orchestrator with a fixture-replay transport.

use clap::Parser;

mod cli;
mod cmd_query;
mod config;
mod replay;
mod run;

/// Log filter resolution: `ACTPOLL_LOG` > `RUST_LOG` > config file > `info`.
fn log_filter(config_level: Option<&str>) -> String {
    std::env::var("ACTPOLL_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .or_else(|| config_level.map(str::to_owned))
        .unwrap_or_else(|| "info".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let file = config::FileConfig::load_or_default(args.config.as_deref())?;

    // stdout carries notifications, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_filter(
            file.log_level.as_deref(),
        )))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        cli::Command::Run(opts) => {
            let poller = config::resolve_poller(&file, &opts)?;
            tracing::info!("actpoll starting");
            run::run(opts, poller).await?;
        }
        cli::Command::Query(opts) => {
            file.poller.validate()?;
            cmd_query::cmd_query(&opts, &file.poller)?;
        }
    }

    Ok(())
}
