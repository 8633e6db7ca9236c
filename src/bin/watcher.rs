use std::sync::Arc;

use clap::Parser;
use health_watch::{
    Watcher,
    config::{Config, read_config_file},
    consul::ConsulSource,
    metrics,
    source::HealthSource,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "health-watch")]
#[command(about = "Streams Consul service and node health transitions as JSON lines", long_about = None)]
struct Args {
    /// Config file
    #[arg(short, long, value_name = "FILE")]
    file: Option<String>,

    /// Log level for stderr output
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("health_watch", level),
        ("health-watch", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let mut config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };
    config.apply_env();
    config.validate()?;

    let source = ConsulSource::connect(&config.consul).await?;
    info!(
        "watching datacenter {} at {}",
        source.datacenter(),
        config.consul.address
    );

    let watcher = Watcher::new(Arc::new(source), config.watch.clone());

    let mut events = tokio::select! {
        events = watcher.run() => events?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted before ready");
            return Ok(());
        }
    };

    info!("watching {} entities", watcher.watched_names().len());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", serde_json::to_string(&event)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    watcher.shutdown();
    info!("emitted {} events", metrics::events_emitted());

    Ok(())
}
