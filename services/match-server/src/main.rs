use anyhow::{Context, Result};
use clap::Parser;
use ludo_match_server::{build, dice_factory, serve, Config, ValidatedConfig};
use std::{net::SocketAddr, path::PathBuf};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML config file (defaults apply when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the validated config and exit.
    #[arg(long)]
    dry_run: bool,

    /// Seed for reproducible dice across all matches (overrides the config file).
    #[arg(long)]
    dice_seed: Option<u64>,

    /// SQLite path for finished match history (overrides the config file).
    #[arg(long)]
    history_path: Option<PathBuf>,
}

fn build_config(args: &Args) -> Result<ValidatedConfig> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(seed) = args.dice_seed {
        config.dice_seed = Some(seed);
    }
    if let Some(path) = &args.history_path {
        config.history_path = Some(path.clone());
    }
    Ok(config.validate()?)
}

fn init_tracing(level: Level, json: bool) {
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args).context("invalid configuration")?;
    if args.dry_run {
        println!("{config:#?}");
        return Ok(());
    }

    init_tracing(config.log_level, config.log_json);
    let addr: SocketAddr = config.listen_addr;
    info!(
        %addr,
        ruleset = %config.rules.ruleset().name,
        seats = config.seats_per_match,
        history = config.history_path.is_some(),
        "starting match server"
    );

    let state = build(&config, dice_factory(config.dice_seed))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    serve(listener, state, shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_config_file() {
        let args = Args::parse_from(["ludo-match-server"]);
        let config = build_config(&args).expect("defaults should validate");
        assert_eq!(config.seats_per_match, 4);
        assert!(config.history_path.is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seats_per_match: 2\ndice_seed: 1").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::parse_from([
            "ludo-match-server",
            "--config",
            path.as_str(),
            "--dice-seed",
            "9",
            "--dry-run",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.seats_per_match, 2);
        assert_eq!(config.dice_seed, Some(9));
        assert!(args.dry_run);
    }

    #[test]
    fn rejects_invalid_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "seats_per_match: 5").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = Args::parse_from(["ludo-match-server", "--config", path.as_str()]);
        let err = build_config(&args).unwrap_err();
        assert!(err.to_string().contains("2..=4"), "unexpected error: {err}");
    }
}
