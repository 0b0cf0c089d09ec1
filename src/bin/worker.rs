use anyhow::Result;
use clap::Parser;
use petrec::services::batch::BatchOutcome;
use petrec::services::scheduler::{run_scheduler, DailySchedule};
use petrec::{init_tracing, AppState, Config};
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single batch immediately and exit instead of following the schedule.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing().await;

    let config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("Config file not found, using default configuration");
        Config::default()
    };

    let state = AppState::new(config).await?;

    if args.once {
        let outcome = state.executor.trigger()?.await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if let BatchOutcome::Failed { error, .. } = outcome {
            error!("Batch run failed: {}", error);
            return Err(anyhow::anyhow!("batch run failed: {}", error));
        }
        return Ok(());
    }

    let schedule = DailySchedule::from_config(&state.config.scheduler)?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let scheduler = tokio::spawn(run_scheduler(schedule, state.executor.clone(), shutdown_rx));
    info!("Batch worker started");

    tokio::signal::ctrl_c().await?;
    info!("Received ctrl-c, stopping worker");
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }

    Ok(())
}
