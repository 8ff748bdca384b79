use std::sync::Arc;

use clap::Parser;
use ripeness::prelude::*;

#[derive(Parser, Debug)]
#[command(version, about = "Fruit ripeness prediction server", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "RIPENESS_BIND", default_value = "0.0.0.0:5000")]
    bind: String,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = PipelineConfig::from(&args.pipeline);
    let pipeline = tokio::task::spawn_blocking(move || Pipeline::load(&config)).await??;
    log::info!("Models loaded");

    let app = ripeness_serve::app(Arc::new(pipeline));
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    log::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
