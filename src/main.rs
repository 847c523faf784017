//! bucket-crosscheck
//!
//! Checks S3 credentials, lists a bucket and optionally downloads its objects
//! through three client backends side by side.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bucket_crosscheck::app::App;
use bucket_crosscheck::cli::{self, Cli};
use bucket_crosscheck::config::ConfigError;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real env vars still apply
    dotenvy::dotenv().ok();

    // Initialize logging (to stderr, so stdout carries only the report)
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    tracing::info!("Starting bucket-crosscheck v{}", env!("CARGO_PKG_VERSION"));

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            // Missing credentials are reported before any other usage error
            let env = |var: &str| std::env::var(var).ok();
            if let Err(missing) = cli::check_raw_credentials(std::env::args(), env) {
                eprintln!("{}", missing);
                std::process::exit(1);
            }
            e.exit()
        }
        Err(e) => e.exit(),
    };
    let (config, mode) = match cli.resolve() {
        Ok(resolved) => resolved,
        Err(e @ ConfigError::MissingCredentials(_)) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let app = App::connect(config).await;
    app.run(&mode).await;

    Ok(())
}
