use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::SearchBudget;

/// プロトコル系統。Handshake と ResponseParser の戦略選択に使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// go コマンドに terminal な bestmove 行で答える系統（チェス・将棋系）
    MoveSearch,
    /// 全応答行が成功/失敗マーカーで始まる系統（囲碁・連珠系）
    Territory,
}

pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_STOP_GRACE_MS: u64 = 1_000;

/// エンジンプロセス起動時の設定。呼び出し側が組み立て、セッション生成後は
/// 変更されない。
///
/// バイナリパスと引数は解決済みの文字列で渡される想定。探索中の時間制御は
/// `default_budget` とリクエスト側の `SearchBudget` で行う。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    pub protocol: ProtocolFamily,
    /// 初期化時に適用するオプション。適用順を保持する
    #[serde(default)]
    pub options: Vec<(String, String)>,
    #[serde(default = "default_budget")]
    pub default_budget: SearchBudget,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// 深さ指定など壁時間の読めないリクエストの上限
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// stop 送信後に terminal 行を待つ猶予。shutdown の quit 猶予も兼ねる
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_budget() -> SearchBudget {
    SearchBudget::MoveTime(1_000)
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_stop_grace_ms() -> u64 {
    DEFAULT_STOP_GRACE_MS
}

impl EngineConfig {
    pub fn new(path: impl Into<PathBuf>, protocol: ProtocolFamily) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            work_dir: None,
            protocol,
            options: Vec::new(),
            default_budget: default_budget(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stop_grace_ms: DEFAULT_STOP_GRACE_MS,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// ログや診断行で使う短い識別子
    pub fn label(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_defaults() {
        let cfg = EngineConfig::new("/usr/bin/stockfish", ProtocolFamily::MoveSearch);
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.stop_grace(), Duration::from_secs(1));
        assert_eq!(cfg.default_budget, SearchBudget::MoveTime(1_000));
        assert_eq!(cfg.label(), "stockfish");
    }

    #[test]
    fn loads_from_toml_with_partial_fields() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            path = "/opt/engines/katago"
            protocol = "territory"
            options = [["boardsize", "19"], ["komi", "6.5"]]
            stop_grace_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.protocol, ProtocolFamily::Territory);
        assert_eq!(cfg.options.len(), 2);
        assert_eq!(cfg.options[0], ("boardsize".to_string(), "19".to_string()));
        // 省略フィールドはデフォルトで埋まる
        assert_eq!(cfg.handshake_timeout_ms, DEFAULT_HANDSHAKE_TIMEOUT_MS);
        assert_eq!(cfg.stop_grace_ms, 500);
        assert!(cfg.args.is_empty());
    }

    #[test]
    fn budget_round_trips_through_toml() {
        let cfg = EngineConfig {
            default_budget: SearchBudget::Depth(12),
            ..EngineConfig::new("engine", ProtocolFamily::MoveSearch)
        };
        let text = toml::to_string(&cfg).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.default_budget, SearchBudget::Depth(12));
    }
}
