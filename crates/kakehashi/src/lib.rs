//! kakehashi — 外部エンジンプロセスへの橋渡し。
//!
//! ボードゲームアプリが手の計算を外部の思考エンジン（別プロセス、
//! stdin/stdout 上の行指向テキストプロトコル）へ委譲するためのライブラリ。
//! プロセスの起動と監視、ハンドシェイク、タイムアウト付きの
//! リクエスト/レスポンス対応付け、プロセス喪失からの復帰までを面倒見る。
//!
//! 局面と指し手は呼び出し側のルールエンジンが符号化した不透明な文字列で、
//! このライブラリは中身を解釈しない。
//!
//! ```no_run
//! use std::time::Duration;
//! use kakehashi::{EngineConfig, EngineSession, ProtocolFamily};
//!
//! let mut cfg = EngineConfig::new("/usr/bin/stockfish", ProtocolFamily::MoveSearch);
//! cfg.options.push(("Threads".to_string(), "2".to_string()));
//!
//! let session = EngineSession::new(cfg);
//! session.initialize()?;
//! let result = session.best_move("startpos moves e2e4")?;
//! println!("{:?}", result.best_move);
//! session.shutdown();
//! # Ok::<(), kakehashi::BridgeError>(())
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod types;

mod channel;

pub use config::{EngineConfig, ProtocolFamily};
pub use error::BridgeError;
pub use session::{Analysis, EngineSession};
pub use supervisor::{LivenessProbe, ProtocolTap};
pub use types::{
    AnalysisSnapshot, EngineState, LineDirection, ProtocolLine, ResultWarning, SearchBudget,
    SearchRequest, SearchResult, SessionStatus,
};
