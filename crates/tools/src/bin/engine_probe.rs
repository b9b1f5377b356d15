//! 実エンジンに1リクエスト投げて結果を JSON で出す確認用ツール。
//!
//! # 使用例
//!
//! - UCI 系エンジンに 500ms で1手:
//!   `cargo run -p tools --bin engine_probe -- --engine /usr/bin/stockfish --movetime 500`
//!
//! - GTP 系エンジンで初手（手番トークン付き、生プロトコル行も表示）:
//!   `cargo run -p tools --bin engine_probe -- --engine /usr/local/bin/katago \
//!     --engine-arg gtp --protocol gtp --turn b --show-lines`
//!
//! - TOML 設定から:
//!   `cargo run -p tools --bin engine_probe -- --config probe.toml`

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;

use kakehashi::{
    EngineConfig, EngineSession, ProtocolFamily, ProtocolTap, SearchBudget, SearchRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "one-shot engine bridge probe")]
struct Cli {
    /// Engine executable path
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Extra engine argument (repeatable)
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Protocol family (uci | gtp)
    #[arg(long)]
    protocol: Option<String>,

    /// Opaque position encoding handed to the engine
    #[arg(long, default_value = "startpos")]
    position: String,

    /// Side token for territory-family generate commands
    #[arg(long)]
    turn: Option<String>,

    /// Time budget per move in milliseconds
    #[arg(long)]
    movetime: Option<u64>,

    /// Depth budget (takes precedence over --movetime)
    #[arg(long)]
    depth: Option<u32>,

    /// Engine option as Name=Value (repeatable)
    #[arg(long = "option")]
    options: Vec<String>,

    /// Load the engine config from a TOML file; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror every protocol line to stderr
    #[arg(long, default_value_t = false)]
    show_lines: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();
    let cfg = build_config(&cli)?;

    let tap = if cli.show_lines {
        ProtocolTap::new(|line| {
            eprintln!(
                "{} {} {}",
                line.at.format("%H:%M:%S%.3f"),
                line.direction.marker(),
                line.text
            );
        })
    } else {
        ProtocolTap::disabled()
    };

    let session = EngineSession::with_tap(cfg, tap);
    info!("initializing engine");
    session.initialize()?;

    let mut request = SearchRequest::new(cli.position.clone());
    if let Some(depth) = cli.depth {
        request = request.budget(SearchBudget::Depth(depth));
    } else if let Some(ms) = cli.movetime {
        request = request.budget(SearchBudget::MoveTime(ms));
    }
    if let Some(turn) = &cli.turn {
        request = request.turn(turn.clone());
    }

    let result = session.search(request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    session.shutdown();
    Ok(())
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<EngineConfig>(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => {
            let Some(engine) = cli.engine.clone() else {
                bail!("either --engine or --config is required");
            };
            EngineConfig::new(engine, ProtocolFamily::MoveSearch)
        }
    };
    if let Some(engine) = cli.engine.clone() {
        cfg.path = engine;
    }
    if !cli.engine_args.is_empty() {
        cfg.args = cli.engine_args.clone();
    }
    if let Some(protocol) = &cli.protocol {
        cfg.protocol = match protocol.as_str() {
            "uci" | "move-search" => ProtocolFamily::MoveSearch,
            "gtp" | "territory" => ProtocolFamily::Territory,
            other => bail!("unknown protocol family: {other}"),
        };
    }
    for option in &cli.options {
        let Some((name, value)) = option.split_once('=') else {
            bail!("--option expects Name=Value, got: {option}");
        };
        cfg.options
            .push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(cfg)
}
