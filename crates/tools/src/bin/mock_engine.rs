//! ブリッジ検証用の偽エンジン。
//!
//! 実エンジンの代わりに両系統の文法を最低限しゃべる。失敗注入フラグで
//! 無応答・途中死・ハンドシェイク拒否などを再現できるので、結合テストの
//! 相手役と手元デバッグの両方に使う。
//!
//! # 使用例
//!
//! - そのまま UCI 相手として起動:
//!   `cargo run -p tools --bin mock_engine`
//!
//! - genmove に 200ms かかる GTP エンジンの振り:
//!   `cargo run -p tools --bin mock_engine -- --protocol gtp --delay-ms 200`

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "scriptable fake engine for bridge tests")]
struct Cli {
    /// プロトコル系統 (uci | gtp)
    #[arg(long, default_value = "uci")]
    protocol: String,

    /// go / genmove に一切応答しない
    #[arg(long, default_value_t = false)]
    silent_go: bool,

    /// terminal 行から指し手を省く
    #[arg(long, default_value_t = false)]
    omit_move: bool,

    /// go / genmove を受けた瞬間に exit する
    #[arg(long, default_value_t = false)]
    die_on_go: bool,

    /// リクエスト外の行を勝手に吐く
    #[arg(long, default_value_t = false)]
    chatter: bool,

    /// terminal 応答前の遅延 (ms)。uci では movetime 指定が優先
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// ハンドシェイクを拒否する
    #[arg(long, default_value_t = false)]
    fail_handshake: bool,

    /// n回目の応答に指し手 m<n> を返す
    #[arg(long, default_value_t = false)]
    serial_moves: bool,

    /// ハンドシェイク完了から指定 ms 後に黙って exit する
    #[arg(long)]
    exit_after_ms: Option<u64>,

    /// 解析行の出力間隔 (ms)
    #[arg(long, default_value_t = 20)]
    analysis_interval_ms: u64,
}

fn main() {
    let cli = Cli::parse();
    match cli.protocol.as_str() {
        "gtp" => run_gtp(&cli),
        _ => run_uci(&cli),
    }
}

fn emit(line: &str) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

fn schedule_exit(after_ms: Option<u64>) {
    if let Some(ms) = after_ms {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            std::process::exit(0);
        });
    }
}

fn parse_after(cmd: &str, key: &str) -> Option<u64> {
    let mut tokens = cmd.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == key {
            return tokens.next().and_then(|v| v.parse().ok());
        }
    }
    None
}

fn run_uci(cli: &Cli) {
    if cli.chatter {
        emit("info string warming up");
    }
    let analyzing = Arc::new(AtomicBool::new(false));
    let mut move_counter = 0u64;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let cmd = line.trim();
        if cmd == "uci" {
            if cli.fail_handshake {
                // uciok を返さず黙る
                continue;
            }
            emit("id name mock_engine");
            emit("id author tools");
            emit("option name Threads type spin default 1 min 1 max 64");
            emit("option name Hash type spin default 16 min 1 max 4096");
            emit("uciok");
        } else if cmd == "isready" {
            emit("readyok");
            schedule_exit(cli.exit_after_ms);
        } else if cmd.starts_with("setoption") || cmd.starts_with("position") {
            // 応答なし
        } else if cmd == "go infinite" {
            if cli.die_on_go {
                std::process::exit(1);
            }
            if cli.silent_go {
                continue;
            }
            analyzing.store(true, Ordering::SeqCst);
            let flag = analyzing.clone();
            let interval = cli.analysis_interval_ms;
            thread::spawn(move || {
                let mut depth = 1u32;
                while flag.load(Ordering::SeqCst) {
                    emit(&format!(
                        "info depth {depth} score cp {} nodes {} pv e2e4 e7e5",
                        10 + depth,
                        1_000 * u64::from(depth)
                    ));
                    depth += 1;
                    thread::sleep(Duration::from_millis(interval));
                }
            });
        } else if cmd.starts_with("go") {
            if cli.die_on_go {
                std::process::exit(1);
            }
            if cli.silent_go {
                continue;
            }
            let wait = parse_after(cmd, "movetime").unwrap_or(cli.delay_ms);
            thread::sleep(Duration::from_millis(wait));
            move_counter += 1;
            emit("info depth 5 score cp 31 nodes 4096 nps 100000 pv e2e4 e7e5");
            if cli.omit_move {
                emit("bestmove");
            } else if cli.serial_moves {
                emit(&format!("bestmove m{move_counter}"));
            } else {
                emit("bestmove e2e4 ponder e7e5");
            }
            if cli.chatter {
                emit("info string idle chatter");
            }
        } else if cmd == "stop" {
            if analyzing.swap(false, Ordering::SeqCst) {
                // ストリームが止まるのを待ってから terminal を返す
                thread::sleep(Duration::from_millis(5));
                emit("bestmove e2e4");
            }
        } else if cmd == "quit" {
            break;
        }
        // 未知コマンドは黙って無視
    }
}

fn run_gtp(cli: &Cli) {
    let analyzing = Arc::new(AtomicBool::new(false));
    let mut move_counter = 0u64;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let cmd = line.trim().to_string();
        if cmd.is_empty() {
            continue;
        }
        // 解析ストリーム中のコマンド到着は解析を止め、応答を空行で閉じる
        if analyzing.swap(false, Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
            emit("");
        }
        let mut tokens = cmd.split_whitespace();
        let head = tokens.next().unwrap_or("");
        match head {
            "boardsize" | "komi" | "clear_board" => {
                if cli.fail_handshake {
                    respond_failure("unimplemented");
                } else {
                    respond_success("");
                    if head == "clear_board" {
                        schedule_exit(cli.exit_after_ms);
                    }
                }
            }
            "play" | "time_settings" => respond_success(""),
            "genmove" => {
                if cli.die_on_go {
                    std::process::exit(1);
                }
                if cli.silent_go {
                    continue;
                }
                thread::sleep(Duration::from_millis(cli.delay_ms));
                move_counter += 1;
                if cli.omit_move {
                    respond_success("");
                } else if cli.serial_moves {
                    respond_success(&format!("m{move_counter}"));
                } else {
                    respond_success("D4");
                }
            }
            "lz-analyze" => {
                if cli.silent_go {
                    continue;
                }
                emit("=");
                analyzing.store(true, Ordering::SeqCst);
                let flag = analyzing.clone();
                let interval = tokens
                    .next()
                    .and_then(|t| t.parse::<u64>().ok())
                    .map(|centis| centis * 10)
                    .unwrap_or(cli.analysis_interval_ms);
                thread::spawn(move || {
                    let mut visits = 100u64;
                    while flag.load(Ordering::SeqCst) {
                        emit(&format!("info move D4 visits {visits} winrate 5500 pv D4 Q16"));
                        visits += 50;
                        thread::sleep(Duration::from_millis(interval));
                    }
                });
            }
            "name" => respond_success("mock_engine"),
            "protocol_version" => respond_success("2"),
            "quit" => {
                respond_success("");
                break;
            }
            _ => respond_failure("unknown command"),
        }
    }
}

fn respond_success(payload: &str) {
    if payload.is_empty() {
        emit("=");
    } else {
        emit(&format!("= {payload}"));
    }
    emit("");
}

fn respond_failure(message: &str) {
    emit(&format!("? {message}"));
    emit("");
}
