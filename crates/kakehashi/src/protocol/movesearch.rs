//! go → bestmove 系プロトコル。
//!
//! チェス系エンジンの行儀に合わせ、ハンドシェイクで advertise された
//! オプション名を控えておき、未掲載のものは送らない。advertise を
//! 一切しないエンジンには全オプションをそのまま送る。

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::EngineConfig;
use crate::error::BridgeError;
use crate::process::{EngineProcess, RecvOutcome};
use crate::supervisor::ProtocolTap;
use crate::types::{AnalysisSnapshot, ResultWarning, SearchBudget, SearchResult};

use super::{MAX_HANDSHAKE_LINES, ProtocolDriver, send};

const IDENT_COMMAND: &str = "uci";
const IDENT_ACK: &str = "uciok";
const READY_COMMAND: &str = "isready";
const READY_ACK: &str = "readyok";
const TERMINAL_PREFIX: &str = "bestmove";

pub struct MoveSearchDriver;

impl ProtocolDriver for MoveSearchDriver {
    fn handshake(
        &self,
        proc_: &mut EngineProcess,
        cfg: &EngineConfig,
        tap: &ProtocolTap,
    ) -> Result<(), BridgeError> {
        send(proc_, tap, IDENT_COMMAND)?;

        // 能力確認行が来るまで identification 行を読み流す。
        // option 行はオプション適用のために名前だけ控える。
        let mut advertised: HashSet<String> = HashSet::new();
        let deadline = Instant::now() + cfg.handshake_timeout();
        let mut seen = 0usize;
        loop {
            if seen >= MAX_HANDSHAKE_LINES {
                return Err(BridgeError::HandshakeFailed(format!(
                    "{IDENT_ACK} not seen within {MAX_HANDSHAKE_LINES} lines"
                )));
            }
            let line = recv_handshake_line(proc_, tap, deadline, IDENT_ACK)?;
            seen += 1;
            if let Some(rest) = line.strip_prefix("option ") {
                if let Some(name) = parse_option_name(rest) {
                    advertised.insert(name);
                }
            } else if line.trim() == IDENT_ACK {
                break;
            }
        }

        for (name, value) in &cfg.options {
            if advertised.is_empty() || advertised.contains(name) {
                send(proc_, tap, &format!("setoption name {name} value {value}"))?;
            } else {
                debug!("option {name} not advertised by engine, skipped");
            }
        }

        send(proc_, tap, "ucinewgame")?;
        send(proc_, tap, READY_COMMAND)?;
        let deadline = Instant::now() + cfg.handshake_timeout();
        loop {
            let line = recv_handshake_line(proc_, tap, deadline, READY_ACK)?;
            if line.trim() == READY_ACK {
                break;
            }
        }
        Ok(())
    }

    fn search_commands(
        &self,
        position: &str,
        _turn: Option<&str>,
        budget: SearchBudget,
    ) -> Vec<String> {
        let go = match budget {
            SearchBudget::MoveTime(ms) => format!("go movetime {ms}"),
            SearchBudget::Depth(depth) => format!("go depth {depth}"),
        };
        vec![format!("position {position}"), go]
    }

    fn response_count(&self, _commands: &[String]) -> usize {
        // position は応答を返さない。go に対する terminal 行で一括完了
        1
    }

    fn is_block_end(&self, line: &str, _block_has_content: bool) -> bool {
        line.starts_with(TERMINAL_PREFIX)
    }

    fn parse_search_response(&self, lines: &[String]) -> SearchResult {
        let mut result = SearchResult::default();
        for line in lines {
            if let Some(snap) = parse_info_line(line) {
                if snap.score_cp.is_some() || snap.score_mate.is_some() {
                    result.score_cp = snap.score_cp;
                    result.score_mate = snap.score_mate;
                }
                result.analysis.push(snap);
            } else if let Some(rest) = line.strip_prefix(TERMINAL_PREFIX) {
                let mut parts = rest.split_whitespace();
                match parts.next() {
                    None => result.warning = Some(ResultWarning::MalformedResponse),
                    // 指し手なしの明示。警告にはしない
                    Some("(none)") | Some("none") | Some("resign") => {}
                    Some(mv) => result.best_move = Some(mv.to_string()),
                }
                if parts.next() == Some("ponder") {
                    result.ponder = parts.next().map(str::to_string);
                }
            }
            // それ以外の行は無視する
        }
        result
    }

    fn analysis_commands(&self, position: &str, _interval: Duration) -> Vec<String> {
        // この系統は出力間隔をエンジン側が決める
        vec![format!("position {position}"), "go infinite".to_string()]
    }

    fn parse_analysis_line(&self, line: &str) -> Option<AnalysisSnapshot> {
        parse_info_line(line)
    }

    fn is_analysis_end(&self, line: &str) -> bool {
        line.starts_with(TERMINAL_PREFIX)
    }

    fn is_analysis_stop_ack(&self, line: &str) -> bool {
        // stop への応答は terminal 行1本
        line.starts_with(TERMINAL_PREFIX)
    }

    fn stop_command(&self) -> Option<&'static str> {
        Some("stop")
    }

    fn analysis_stop_command(&self) -> &'static str {
        "stop"
    }
}

fn recv_handshake_line(
    proc_: &mut EngineProcess,
    tap: &ProtocolTap,
    deadline: Instant,
    waiting_for: &str,
) -> Result<String, BridgeError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(BridgeError::HandshakeFailed(format!(
            "timeout waiting for {waiting_for}"
        )));
    }
    match proc_.recv_line(remaining) {
        RecvOutcome::Line(line) => {
            tap.record_received(&line);
            Ok(line)
        }
        RecvOutcome::TimedOut => Err(BridgeError::HandshakeFailed(format!(
            "timeout waiting for {waiting_for}"
        ))),
        RecvOutcome::Disconnected => Err(BridgeError::HandshakeFailed(format!(
            "engine closed stdout before {waiting_for}"
        ))),
    }
}

/// `option name Threads type spin ...` の name 部分を取り出す。
/// 名前は空白を含むことがあるので type まで読む。
pub(crate) fn parse_option_name(rest: &str) -> Option<String> {
    let mut tokens = rest.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token == "name" {
            let mut parts = Vec::new();
            while let Some(next) = tokens.peek() {
                if *next == "type" {
                    break;
                }
                parts.push(tokens.next().unwrap().to_string());
            }
            if !parts.is_empty() {
                return Some(parts.join(" "));
            }
        }
    }
    None
}

/// info 行を1つのスナップショットに落とす。info 以外の行は None。
pub(crate) fn parse_info_line(line: &str) -> Option<AnalysisSnapshot> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first().copied() != Some("info") {
        return None;
    }
    let mut snap = AnalysisSnapshot {
        raw: line.to_string(),
        ..Default::default()
    };
    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                if i + 1 < tokens.len() {
                    snap.depth = tokens[i + 1].parse::<u32>().ok();
                    i += 1;
                }
            }
            "seldepth" => {
                if i + 1 < tokens.len() {
                    snap.seldepth = tokens[i + 1].parse::<u32>().ok();
                    i += 1;
                }
            }
            "nodes" => {
                if i + 1 < tokens.len() {
                    snap.nodes = tokens[i + 1].parse::<u64>().ok();
                    i += 1;
                }
            }
            "nps" => {
                if i + 1 < tokens.len() {
                    snap.nps = tokens[i + 1].parse::<u64>().ok();
                    i += 1;
                }
            }
            "time" => {
                if i + 1 < tokens.len() {
                    snap.time_ms = tokens[i + 1].parse::<u64>().ok();
                    i += 1;
                }
            }
            "score" => {
                if i + 2 < tokens.len() {
                    match tokens[i + 1] {
                        "cp" => {
                            snap.score_cp = tokens[i + 2].parse::<i32>().ok();
                            snap.score_mate = None;
                            i += 2;
                        }
                        "mate" => {
                            snap.score_mate = tokens[i + 2].parse::<i32>().ok();
                            snap.score_cp = None;
                            i += 2;
                        }
                        _ => {}
                    }
                }
            }
            "pv" => {
                let pv: Vec<String> = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                if !pv.is_empty() {
                    snap.pv = pv;
                }
                break;
            }
            // 未知トークンは読み飛ばす
            _ => {}
        }
        i += 1;
    }
    Some(snap)
}
