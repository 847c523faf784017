//! CLI argument definitions
//!
//! Every connection setting can come from a flag or its environment variable;
//! `main` loads `.env` before parsing so either source works.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::Mode;
use crate::config::{
    prepare_output_dir, Config, ConfigError, S3Config, ACCESS_KEY_VAR, DEFAULT_BUCKET,
    DEFAULT_CONCURRENCY, DEFAULT_MAX_ITEMS, DEFAULT_REGION, SECRET_KEY_VAR,
};
use crate::download::DownloadOptions;
use crate::s3::backend::BackendKind;

/// Cross-check S3 credentials, listings and downloads through three clients.
///
/// ## Examples
///
/// Check credentials and list the first 20 objects:
///   bucket-crosscheck auth 20
///
/// Download what each backend lists into ./out:
///   bucket-crosscheck download --outdir ./out --limit 50
///
/// Against a local MinIO:
///   bucket-crosscheck --endpoint-url http://localhost:9000 --backend object-store auth
#[derive(Parser, Debug)]
#[command(name = "bucket-crosscheck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// AWS access key ID
    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key: Option<String>,

    /// AWS secret access key
    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// AWS session token for temporary credentials
    #[arg(long, global = true, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// AWS region
    #[arg(long, global = true, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Bucket to check, list and download from
    #[arg(long, global = true, env = "S3_TEST_BUCKET", default_value = DEFAULT_BUCKET)]
    pub bucket: String,

    /// Custom S3 endpoint URL (MinIO, LocalStack); enables path-style addressing
    #[arg(long, global = true, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Backend to run (can be specified multiple times; default all)
    #[arg(long = "backend", global = true, value_enum)]
    pub backends: Vec<BackendKind>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify credentials and list each backend's view of the bucket
    Auth {
        /// Maximum objects to list per backend
        #[arg(env = "S3_LIST_LIMIT", allow_negative_numbers = true)]
        max_items: Option<String>,
    },

    /// Verify, list, then download listed objects into per-backend directories
    Download {
        /// Output root; files land in <OUTDIR>/<backend>/<key>
        #[arg(long)]
        outdir: PathBuf,

        /// Maximum objects to list (and download) per backend
        #[arg(long, env = "S3_LIST_LIMIT", default_value_t = DEFAULT_MAX_ITEMS)]
        limit: usize,

        /// Parallel downloads per backend (must be >= 1)
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_positive_usize)]
        concurrency: usize,
    },
}

impl ConnectionArgs {
    /// Resolve connection settings, failing on missing credentials.
    pub fn s3_config(&self) -> Result<S3Config, ConfigError> {
        S3Config::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            self.region.clone(),
            self.bucket.clone(),
        )?
        .with_session_token(self.session_token.clone())
        .with_endpoint(self.endpoint_url.clone())
    }
}

impl Cli {
    /// Resolve the full run configuration and mode.
    ///
    /// Credentials are checked first; nothing else is touched when they are
    /// missing.
    pub fn resolve(&self) -> Result<(Config, Mode), ConfigError> {
        let s3 = self.connection.s3_config()?;
        let config = Config::new(s3).with_backends(&self.connection.backends);

        match &self.command {
            Command::Auth { max_items } => {
                let max_items = max_items.as_deref().map_or(DEFAULT_MAX_ITEMS, parse_max_items);
                Ok((config.with_max_items(max_items), Mode::Auth))
            }
            Command::Download {
                outdir,
                limit,
                concurrency,
            } => {
                let output_root = prepare_output_dir(outdir)?;
                let options = DownloadOptions::new(output_root).with_concurrency(*concurrency);
                Ok((config.with_max_items(*limit), Mode::Download(options)))
            }
        }
    }
}

/// Credential gate for command lines clap rejected.
///
/// Missing credentials are reported ahead of any other usage error, so the
/// flags are looked up in the raw arguments with the environment as fallback.
pub fn check_raw_credentials<I, F>(args: I, env: F) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str) -> Option<String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let lookup = |flag: &str, var: &str| {
        let inline = format!("{flag}=");
        args.iter()
            .enumerate()
            .find_map(|(i, arg)| match arg.strip_prefix(&inline) {
                Some(value) => Some(value.to_string()),
                None if arg == flag => args.get(i + 1).cloned(),
                None => None,
            })
            .or_else(|| env(var))
    };

    S3Config::new(
        lookup("--access-key", ACCESS_KEY_VAR),
        lookup("--secret-key", SECRET_KEY_VAR),
        DEFAULT_REGION,
        DEFAULT_BUCKET,
    )
    .map(|_| ())
}

/// Parse the `auth` positional, falling back to the default on bad input.
fn parse_max_items(raw: &str) -> usize {
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            eprintln!(
                "Invalid max_items '{}'; falling back to default {}",
                raw, DEFAULT_MAX_ITEMS
            );
            DEFAULT_MAX_ITEMS
        }
    }
}

/// Parse a positive usize (>= 1).
fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number", s))?;
    if value < 1 {
        return Err(format!("{} is not in 1..", value));
    }
    Ok(value)
}
