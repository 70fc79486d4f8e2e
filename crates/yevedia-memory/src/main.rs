// yevedia/crates/yevedia-memory/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use yevedia_memory::{cli::Cli, config::Config, telemetry};

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    cfg.print_config();

    let output = yevedia_memory::cli::run(cli, &cfg)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
