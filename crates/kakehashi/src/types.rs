use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// セッションの状態。
///
/// 遷移は単調で、例外は2つ: プロセス喪失による `* -> Dead` と、明示的な
/// shutdown による `* -> Terminated`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    Dead,
    Terminated,
}

impl EngineState {
    /// initialize を受け付けられる状態か。
    ///
    /// `Dead` からの再初期化は明示的な復旧手段として許可する。
    pub fn can_initialize(self) -> bool {
        matches!(
            self,
            EngineState::Uninitialized | EngineState::Terminated | EngineState::Dead
        )
    }

    /// 探索リクエストを受け付けられる状態か
    pub fn can_submit(self) -> bool {
        matches!(self, EngineState::Ready)
    }

    /// プロセスが生きている想定の状態か
    pub fn expects_live_process(self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Busy)
    }
}

/// 1手分の探索予算。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBudget {
    /// 1手あたりの持ち時間 (ms)
    MoveTime(u64),
    /// 探索深さ固定
    Depth(u32),
}

/// 1回分の探索リクエスト。
///
/// `position` は呼び出し側のルールエンジンが符号化した不透明な文字列で、
/// ブリッジは中身を解釈しない。
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub position: String,
    /// None なら `EngineConfig::default_budget` を使う
    pub budget: Option<SearchBudget>,
    /// territory 系の generate コマンドに渡す手番トークン。
    /// move-search 系では無視される。
    pub turn: Option<String>,
}

impl SearchRequest {
    pub fn new(position: impl Into<String>) -> Self {
        Self {
            position: position.into(),
            budget: None,
            turn: None,
        }
    }

    pub fn budget(mut self, budget: SearchBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn turn(mut self, turn: impl Into<String>) -> Self {
        self.turn = Some(turn.into());
        self
    }
}

/// 応答のパースが劣化したときに結果へ添える警告。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultWarning {
    /// terminal 行から必須フィールドを取り出せなかった
    MalformedResponse,
}

/// 1リクエスト分の探索結果。
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResult {
    /// このリクエストに振られた局所一意な id
    pub request_id: u64,
    /// 指し手。エンジンが明示的に「指し手なし」を返した場合も None
    pub best_move: Option<String>,
    /// move-search 系の follow-up 手 (ponder)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    /// 到着順を保った中間解析行
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub analysis: Vec<AnalysisSnapshot>,
    pub elapsed_ms: u64,
    /// terminal 行が stop 送信後の猶予期間にしか来なかった
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ResultWarning>,
}

/// 解析1行分のスナップショット。系統ごとに埋まるフィールドは異なる。
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seldepth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u64>,
    /// territory 系の探索回数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_cp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_mate: Option<i32>,
    /// territory 系の勝率 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winrate: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
    /// 元の行。構造化できなかった自由記述もここに残る
    pub raw: String,
}

/// 生プロトコル行1本。診断専用。
#[derive(Debug, Clone)]
pub struct ProtocolLine {
    pub direction: LineDirection,
    pub text: String,
    pub at: DateTime<Local>,
}

impl ProtocolLine {
    pub fn sent(text: &str) -> Self {
        Self {
            direction: LineDirection::Sent,
            text: text.to_string(),
            at: Local::now(),
        }
    }

    pub fn received(text: &str) -> Self {
        Self {
            direction: LineDirection::Received,
            text: text.to_string(),
            at: Local::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    Sent,
    Received,
}

impl LineDirection {
    pub fn marker(self) -> &'static str {
        match self {
            LineDirection::Sent => ">>>",
            LineDirection::Received => "<<<",
        }
    }
}

/// `status()` が返すスナップショット。
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: EngineState,
    pub last_error: Option<String>,
}

pub fn duration_to_millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
