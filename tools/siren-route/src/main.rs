use anyhow::Result;
use clap::Parser;
use siren_route::cli::{run, Cli};
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    // RUST_LOG wins; plain `info` otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);
    run(cli)
}
