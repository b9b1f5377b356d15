use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::EngineState;

/// ブリッジが返すエラー。
///
/// パース劣化（terminal 行から必須フィールドを取り出せない等）はここに
/// 含めない。リクエスト自体は成功扱いにし、`SearchResult` の warning で
/// 返す。
#[derive(Debug, Error)]
pub enum BridgeError {
    /// 実行ファイルが存在しない・実行できない・OS がプロセス生成を拒否した
    #[error("failed to spawn engine {}: {source}", .path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 初期化シーケンスの不一致またはタイムアウト
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// stop 送信と猶予期間の後も terminal 行が来なかった
    #[error("no terminal line within {waited_ms}ms")]
    RequestTimeout { waited_ms: u64 },

    /// パイプ切断・読み書きエラーでプロセスを失った
    #[error("engine process died: {0}")]
    ProcessDied(String),

    /// quit を無視したため強制 kill した
    #[error("engine ignored quit and was force-killed")]
    ShutdownTimeout,

    /// 現在の状態では受け付けられない操作
    #[error("cannot {operation} while session is {state:?}")]
    InvalidState {
        state: EngineState,
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_names_the_operation() {
        let e = BridgeError::InvalidState {
            state: EngineState::Busy,
            operation: "initialize",
        };
        assert_eq!(e.to_string(), "cannot initialize while session is Busy");
    }
}
