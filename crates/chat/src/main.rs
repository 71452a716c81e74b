// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use chatwire::cli::TokenSource;
use chatwire::config::ChatConfig;

/// Terminal client for a realtime chat room.
#[derive(Debug, Parser)]
#[command(name = "chatwire", version, about)]
struct Cli {
    #[command(flatten)]
    config: ChatConfig,

    /// Bearer token for the chat backend.
    #[arg(long, env = "CHATWIRE_TOKEN", conflicts_with = "token_file")]
    token: Option<String>,

    /// File holding the bearer token; followed for changes.
    #[arg(long, env = "CHATWIRE_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "CHATWIRE_LOG_FORMAT")]
    log_format: String,

    /// Log level filter.
    #[arg(long, default_value = "warn", env = "CHATWIRE_LOG_LEVEL")]
    log_level: String,
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let token = match (cli.token, cli.token_file) {
        (Some(token), _) => TokenSource::Inline(token),
        (None, Some(path)) => TokenSource::File(path),
        (None, None) => {
            error!("a token is required (--token or --token-file)");
            std::process::exit(2);
        }
    };

    if let Err(e) = chatwire::cli::run(cli.config, token).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
