//! 成功/失敗マーカー系プロトコル。
//!
//! 全応答行が `=` か `?` で始まり、1応答は空行で閉じる。局面は
//! 呼び出し側が符号化した設定コマンド列（改行区切り）をそのまま流す。

use std::time::{Duration, Instant};

use log::debug;

use crate::config::EngineConfig;
use crate::error::BridgeError;
use crate::process::{EngineProcess, RecvOutcome};
use crate::supervisor::ProtocolTap;
use crate::types::{AnalysisSnapshot, ResultWarning, SearchBudget, SearchResult};

use super::{ProtocolDriver, send};

const SUCCESS_MARKER: char = '=';
const FAILURE_MARKER: char = '?';
const BOARDSIZE_OPTION: &str = "boardsize";
const DEFAULT_BOARDSIZE: &str = "19";

pub struct TerritoryDriver;

impl ProtocolDriver for TerritoryDriver {
    fn handshake(
        &self,
        proc_: &mut EngineProcess,
        cfg: &EngineConfig,
        tap: &ProtocolTap,
    ) -> Result<(), BridgeError> {
        let boardsize = cfg
            .options
            .iter()
            .find(|(name, _)| name == BOARDSIZE_OPTION)
            .map(|(_, value)| value.as_str())
            .unwrap_or(DEFAULT_BOARDSIZE);
        handshake_command(
            proc_,
            tap,
            &format!("{BOARDSIZE_OPTION} {boardsize}"),
            cfg.handshake_timeout(),
        )?;
        // 残りのオプションはそのままコマンドとして流す (komi 6.5 等)
        for (name, value) in &cfg.options {
            if name == BOARDSIZE_OPTION {
                continue;
            }
            handshake_command(
                proc_,
                tap,
                &format!("{name} {value}"),
                cfg.handshake_timeout(),
            )?;
        }
        handshake_command(proc_, tap, "clear_board", cfg.handshake_timeout())?;
        Ok(())
    }

    fn search_commands(
        &self,
        position: &str,
        turn: Option<&str>,
        budget: SearchBudget,
    ) -> Vec<String> {
        let mut commands: Vec<String> = position
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        match budget {
            SearchBudget::MoveTime(ms) => {
                // 1手ごとの秒読みとして渡す。秒未満は切り上げる
                let seconds = ms.div_ceil(1_000).max(1);
                commands.push(format!("time_settings 0 {seconds} 1"));
            }
            SearchBudget::Depth(depth) => {
                // この系統に深さ指定はない。壁時間上限だけで縛る
                debug!("depth budget {depth} has no command in this family, ignored");
            }
        }
        let turn = turn.unwrap_or("b");
        commands.push(format!("genmove {turn}"));
        commands
    }

    fn response_count(&self, commands: &[String]) -> usize {
        // コマンド1つにつき応答ブロック1つ
        commands.len()
    }

    fn is_block_end(&self, line: &str, block_has_content: bool) -> bool {
        line.trim().is_empty() && block_has_content
    }

    fn parse_search_response(&self, lines: &[String]) -> SearchResult {
        let mut result = SearchResult::default();
        let blocks = split_blocks(lines);
        let Some((last, setup)) = blocks.split_last() else {
            result.warning = Some(ResultWarning::MalformedResponse);
            return result;
        };
        // 局面設定側の失敗も結果には乗せる
        if setup
            .iter()
            .any(|block| block.first().is_some_and(|l| l.starts_with(FAILURE_MARKER)))
        {
            result.warning = Some(ResultWarning::MalformedResponse);
        }
        match last.first().copied() {
            Some(head) if head.starts_with(SUCCESS_MARKER) => {
                let payload = head[SUCCESS_MARKER.len_utf8()..].trim();
                match payload.split_whitespace().next() {
                    None => result.warning = Some(ResultWarning::MalformedResponse),
                    Some(mv) if mv.eq_ignore_ascii_case("resign") => {
                        // 投了は指し手なしの明示。警告にはしない
                    }
                    Some(mv) => result.best_move = Some(mv.to_string()),
                }
            }
            _ => result.warning = Some(ResultWarning::MalformedResponse),
        }
        result
    }

    fn analysis_commands(&self, position: &str, interval: Duration) -> Vec<String> {
        let mut commands: Vec<String> = position
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        // 出力間隔はセンチ秒
        let centis = (interval.as_millis() / 10).max(1);
        commands.push(format!("lz-analyze {centis}"));
        commands
    }

    fn parse_analysis_line(&self, line: &str) -> Option<AnalysisSnapshot> {
        parse_analysis_info(line)
    }

    fn is_analysis_end(&self, line: &str) -> bool {
        // 解析開始コマンド自体の失敗応答でストリームは終わる
        line.starts_with(FAILURE_MARKER)
    }

    fn is_analysis_stop_ack(&self, line: &str) -> bool {
        // 解析行は info で始まるので、マーカー行は停止コマンドへの応答
        line.starts_with(SUCCESS_MARKER) || line.starts_with(FAILURE_MARKER)
    }

    fn stop_command(&self) -> Option<&'static str> {
        // 進行中の generate を中断する手段がこの系統にはない。
        // 停止コマンドを送るとその応答が generate の応答と混同されるので、
        // タイムアウトは即プロセス破棄で扱う
        None
    }

    fn analysis_stop_command(&self) -> &'static str {
        // 解析ストリームは次のコマンド到着で止まる。盤面に影響しないものを選ぶ
        "name"
    }
}

/// 1コマンド送り、空行までの応答を読んで成功マーカーを要求する。
fn handshake_command(
    proc_: &mut EngineProcess,
    tap: &ProtocolTap,
    command: &str,
    timeout: Duration,
) -> Result<(), BridgeError> {
    send(proc_, tap, command)?;
    let deadline = Instant::now() + timeout;
    let mut head: Option<String> = None;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BridgeError::HandshakeFailed(format!(
                "timeout waiting for response to {command}"
            )));
        }
        match proc_.recv_line(remaining) {
            RecvOutcome::Line(line) => {
                tap.record_received(&line);
                if line.trim().is_empty() {
                    if head.is_some() {
                        break;
                    }
                    continue;
                }
                if head.is_none() {
                    head = Some(line);
                }
            }
            RecvOutcome::TimedOut => {
                return Err(BridgeError::HandshakeFailed(format!(
                    "timeout waiting for response to {command}"
                )));
            }
            RecvOutcome::Disconnected => {
                return Err(BridgeError::HandshakeFailed(format!(
                    "engine closed stdout during {command}"
                )));
            }
        }
    }
    let head = head.unwrap_or_default();
    if head.starts_with(SUCCESS_MARKER) {
        Ok(())
    } else {
        Err(BridgeError::HandshakeFailed(format!(
            "{command} rejected: {head}"
        )))
    }
}

fn split_blocks(lines: &[String]) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line.as_str());
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// `info move D4 visits 120 winrate 5500 pv D4 Q16` 形式の解析行。
fn parse_analysis_info(line: &str) -> Option<AnalysisSnapshot> {
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
            "move" => {
                if i + 1 < tokens.len() {
                    // 候補手は pv の先頭にも現れるので個別には持たない
                    i += 1;
                }
            }
            "visits" => {
                if i + 1 < tokens.len() {
                    snap.visits = tokens[i + 1].parse::<u64>().ok();
                    i += 1;
                }
            }
            "winrate" => {
                if i + 1 < tokens.len() {
                    // 万分率で来るので % へ
                    snap.winrate = tokens[i + 1].parse::<f64>().ok().map(|w| w / 100.0);
                    i += 1;
                }
            }
            "pv" => {
                let pv: Vec<String> = tokens[i + 1..].iter().map(|t| t.to_string()).collect();
                if !pv.is_empty() {
                    snap.pv = pv;
                }
                break;
            }
            _ => {}
        }
        i += 1;
    }
    Some(snap)
}
