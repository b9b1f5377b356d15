//! プロトコル系統ごとの戦略。
//!
//! 系統差は「初期化シーケンス」「コマンドの組み立て」「応答の区切り方と
//! 読み取り」に集約されるので、その3点をまとめて1つの戦略として
//! 差し替える。系統ごとのサブクラス化はしない。

mod movesearch;
mod territory;

pub use movesearch::MoveSearchDriver;
pub use territory::TerritoryDriver;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, ProtocolFamily};
use crate::error::BridgeError;
use crate::process::EngineProcess;
use crate::supervisor::ProtocolTap;
use crate::types::{AnalysisSnapshot, SearchBudget, SearchResult};

/// 1系統分の Handshake + ResponseParser。
pub trait ProtocolDriver: Send + Sync {
    /// spawn 直後に1度だけ実行する初期化シーケンス。
    ///
    /// 途中で失敗したプロセスは呼び出し側が破棄する前提で、ここでは
    /// 後始末をしない。
    fn handshake(
        &self,
        proc_: &mut EngineProcess,
        cfg: &EngineConfig,
        tap: &ProtocolTap,
    ) -> Result<(), BridgeError>;

    /// 1リクエスト分のコマンド列。
    fn search_commands(
        &self,
        position: &str,
        turn: Option<&str>,
        budget: SearchBudget,
    ) -> Vec<String>;

    /// コマンド列に対して応答ブロックがいくつ返るか。
    /// move-search 系は一括で1つ、territory 系はコマンドごとに1つ。
    fn response_count(&self, commands: &[String]) -> usize;

    /// この行で1応答ブロックが閉じるか。
    /// `block_has_content` は現在のブロックに中身のある行を読んだか。
    fn is_block_end(&self, line: &str, block_has_content: bool) -> bool;

    /// 蓄積した応答行から結果を取り出す。抽出失敗は warning に落とし、
    /// エラーにはしない。
    fn parse_search_response(&self, lines: &[String]) -> SearchResult;

    /// 解析モードを開始するコマンド列。
    fn analysis_commands(&self, position: &str, interval: Duration) -> Vec<String>;

    /// 解析中の1行をスナップショットへ。対象外の行は None。
    fn parse_analysis_line(&self, line: &str) -> Option<AnalysisSnapshot>;

    /// 解析ストリームがエンジン側の都合で終わったことを示す行か。
    fn is_analysis_end(&self, line: &str) -> bool;

    /// stop への応答と認める行か。解析キャンセル時はこの行まで読み捨てる。
    fn is_analysis_stop_ack(&self, line: &str) -> bool;

    /// 探索を中断させるコマンド。中断手段のない系統は None で、
    /// タイムアウトは猶予なしで即プロセス破棄になる。
    fn stop_command(&self) -> Option<&'static str>;

    /// 解析ストリームを止めるコマンド。
    fn analysis_stop_command(&self) -> &'static str;
}

pub fn driver_for(family: ProtocolFamily) -> Arc<dyn ProtocolDriver> {
    match family {
        ProtocolFamily::MoveSearch => Arc::new(MoveSearchDriver),
        ProtocolFamily::Territory => Arc::new(TerritoryDriver),
    }
}

/// ハンドシェイク中に読む行数の上限。おしゃべりなエンジンの出力で
/// タイムアウトまで空回りし続けないための打ち切り。
pub(crate) const MAX_HANDSHAKE_LINES: usize = 4096;

pub(crate) fn send(
    proc_: &mut EngineProcess,
    tap: &ProtocolTap,
    cmd: &str,
) -> Result<(), BridgeError> {
    tap.record_sent(cmd);
    proc_.write_line(cmd)
}
