use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::EngineConfig;
use crate::error::BridgeError;

const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DROP_QUIT_GRACE: Duration = Duration::from_millis(300);

/// 両系統とも quit で終了を指示できる
pub const QUIT_COMMAND: &str = "quit";

/// 1本のエンジンプロセスと stdin/stdout をカプセル化する。
///
/// stdout は専用スレッドが行単位で読み、mpsc 経由で受け渡す。呼び出し側は
/// 常にタイムアウト付きでしか行を待てないので、生の読みでブロックし続ける
/// ことはない。
pub struct EngineProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<String>,
    label: String,
}

/// `recv_line` の結果。タイムアウトとパイプ切断を呼び出し側で区別する。
#[derive(Debug)]
pub enum RecvOutcome {
    Line(String),
    TimedOut,
    /// 読み取りスレッドが終了した。プロセス死の兆候
    Disconnected,
}

impl EngineProcess {
    pub fn spawn(cfg: &EngineConfig, label: &str) -> Result<Self, BridgeError> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        if let Some(dir) = &cfg.work_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BridgeError::SpawnFailed {
                path: cfg.path.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ProcessDied(format!("{label}: no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ProcessDied(format!("{label}: no stdout pipe")))?;

        let (tx, rx) = mpsc::channel::<String>();
        let reader_label = label.to_string();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("{reader_label}: stdout read ended: {e}");
                        break;
                    }
                }
            }
        });

        debug!("{label}: spawned pid {}", child.id());
        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            label: label.to_string(),
        })
    }

    /// 1行書いて flush する。失敗はプロセス喪失として扱う。
    pub fn write_line(&mut self, msg: &str) -> Result<(), BridgeError> {
        let written = self
            .stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush());
        written.map_err(|e| BridgeError::ProcessDied(format!("{}: write failed: {e}", self.label)))
    }

    pub fn recv_line(&self, timeout: Duration) -> RecvOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => RecvOutcome::Line(line),
            Err(RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => RecvOutcome::Disconnected,
        }
    }

    /// 溜まっている行をブロックせずに取り出す
    pub fn try_recv_line(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn kill_now(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    /// quit を送って自発終了を猶予期間だけ待ち、だめなら kill する。
    /// 強制 kill に落ちた場合 true を返す。
    pub fn shutdown(&mut self, grace: Duration) -> bool {
        let _ = self.write_line(QUIT_COMMAND);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!("{}: exited with {status}", self.label);
                return false;
            }
            thread::sleep(QUIT_POLL_INTERVAL);
        }
        warn!("{}: ignored {QUIT_COMMAND}, killing", self.label);
        self.kill_now();
        true
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            self.shutdown(DROP_QUIT_GRACE);
        }
    }
}
