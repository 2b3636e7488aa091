//! Tether CLI binary entry point.

use tether::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let result = match cli.command {
        // Blocking mode owns its own runtime thread; keep it off the async workers.
        Commands::Tools(args) => {
            match tokio::task::spawn_blocking(move || tether::cli::handle_tools(&args)).await {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Call(args) => tether::cli::handle_call(&args).await.map(|value| match value {
            serde_json::Value::String(text) => println!("{text}"),
            other => println!(
                "{}",
                serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string())
            ),
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
