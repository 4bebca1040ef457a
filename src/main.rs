use clap::Parser;
use tracing::{error, info, span, Instrument, Level};
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let span = span!(Level::INFO, "main", context = "main");
    let result = async move {
        info!(uri = %args.uri, "called");
        cli::run(args).await
    }
    .instrument(span)
    .await;

    if let Err(err) = result {
        error!(error_message=%err, error_group="cli");
        eprintln!("bucketfs: {}", err);
        std::process::exit(1);
    }
}
