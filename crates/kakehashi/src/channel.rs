//! 単一プロセスへのアクセスを直列化するリクエストチャンネル。
//!
//! スロット (プロセスの入った `Option`) を公平 mutex の下に置き、待機中の
//! 呼び出しを FIFO で順に通す。terminal 行を待つリクエストは常に高々1つ。
//!
//! タイムアウト時は、系統に停止コマンドがあればそれを一度だけ送って
//! 猶予期間だけ続きを待つ。猶予内に terminal が来ればこのリクエストの
//! 結果として扱い (timed_out フラグ付き)、来なければ呼び出し側が
//! プロセスを破棄する。スロットが空になるので、遅れて来た terminal 行が
//! 後続の無関係なリクエストに紐付くことはない。

use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Mutex, MutexGuard};

use crate::error::BridgeError;
use crate::process::{EngineProcess, RecvOutcome};
use crate::protocol::ProtocolDriver;
use crate::supervisor::ProtocolTap;
use crate::types::duration_to_millis;

pub(crate) struct RequestChannel {
    slot: Mutex<Option<EngineProcess>>,
    tap: ProtocolTap,
}

impl RequestChannel {
    pub fn new(tap: ProtocolTap) -> Self {
        Self {
            slot: Mutex::new(None),
            tap,
        }
    }

    /// 排他権の獲得。解放は `MutexGuard::unlock_fair` で行い、待機者に
    /// 到着順で渡す。
    pub fn lock(&self) -> MutexGuard<'_, Option<EngineProcess>> {
        self.slot.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, Option<EngineProcess>>> {
        self.slot.try_lock()
    }

    pub fn tap(&self) -> &ProtocolTap {
        &self.tap
    }
}

/// ロック獲得済みのプロセスに対する1往復分の操作。
pub(crate) struct Exchange<'a> {
    pub proc_: &'a mut EngineProcess,
    pub driver: &'a dyn ProtocolDriver,
    pub tap: &'a ProtocolTap,
}

/// `submit` が terminal 行まで読み切ったときの持ち帰り。
pub(crate) struct SubmitOutcome {
    pub lines: Vec<String>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl Exchange<'_> {
    /// リクエスト外に届いていた自発出力を診断側へ流しきる。
    /// 次のリクエストの応答に混ざらないよう、書き込み前に必ず呼ぶ。
    pub fn drain_pending(&mut self) {
        while let Some(line) = self.proc_.try_recv_line() {
            trace!("{}: stray line: {line}", self.proc_.label());
            self.tap.record_received(&line);
        }
    }

    pub fn send(&mut self, command: &str) -> Result<(), BridgeError> {
        self.tap.record_sent(command);
        self.proc_.write_line(command)
    }

    /// コマンド列を書き、期待する応答ブロック数を読み切るまで行を集める。
    ///
    /// `soft_limit` 超過で stop を一度だけ送り、そこから `grace` だけ
    /// 追加で待つ。どちらの期限も読み待ちがブロックし続けない形で守る。
    pub fn submit(
        &mut self,
        commands: &[String],
        soft_limit: Duration,
        grace: Duration,
    ) -> Result<SubmitOutcome, BridgeError> {
        self.drain_pending();
        for command in commands {
            self.send(command)?;
        }
        let expected_blocks = self.driver.response_count(commands);

        let start = Instant::now();
        let mut stop_sent = false;
        let mut lines: Vec<String> = Vec::new();
        let mut blocks_done = 0usize;
        let mut block_has_content = false;

        loop {
            let deadline = if stop_sent { soft_limit + grace } else { soft_limit };
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                match self.driver.stop_command() {
                    Some(stop) if !stop_sent => {
                        debug!("{}: soft deadline hit, sending {stop}", self.proc_.label());
                        self.send(stop)?;
                        stop_sent = true;
                        continue;
                    }
                    _ => {
                        return Err(BridgeError::RequestTimeout {
                            waited_ms: duration_to_millis(elapsed),
                        });
                    }
                }
            }

            match self.proc_.recv_line(deadline - elapsed) {
                RecvOutcome::Line(line) => {
                    self.tap.record_received(&line);
                    let block_closed = self.driver.is_block_end(&line, block_has_content);
                    if !line.trim().is_empty() {
                        block_has_content = true;
                    }
                    lines.push(line);
                    if block_closed {
                        blocks_done += 1;
                        block_has_content = false;
                        if blocks_done >= expected_blocks {
                            return Ok(SubmitOutcome {
                                lines,
                                elapsed_ms: duration_to_millis(start.elapsed()),
                                timed_out: stop_sent,
                            });
                        }
                    }
                }
                RecvOutcome::TimedOut => {
                    // 期限判定はループ先頭で行う
                }
                RecvOutcome::Disconnected => {
                    return Err(BridgeError::ProcessDied(format!(
                        "{}: stdout closed mid-request",
                        self.proc_.label()
                    )));
                }
            }
        }
    }

    /// 解析ストリームを止め、stop への応答行まで猶予期間だけ読み捨てる。
    /// きれいに止まったら true。false なら呼び出し側がプロセスを畳む。
    /// 読み残し（末尾の空行など）は次のリクエストの `drain_pending` が拾う。
    pub fn stop_analysis(&mut self, grace: Duration) -> Result<bool, BridgeError> {
        self.send(self.driver.analysis_stop_command())?;
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match self.proc_.recv_line(remaining) {
                RecvOutcome::Line(line) => {
                    self.tap.record_received(&line);
                    if self.driver.is_analysis_stop_ack(&line) {
                        return Ok(true);
                    }
                }
                RecvOutcome::TimedOut => return Ok(false),
                RecvOutcome::Disconnected => {
                    return Err(BridgeError::ProcessDied(format!(
                        "{}: stdout closed while stopping analysis",
                        self.proc_.label()
                    )));
                }
            }
        }
    }
}
