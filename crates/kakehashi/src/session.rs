//! エンジンセッションのファサード。
//!
//! 1セッションが1プロセスを所有する。複数エンジンを並列に使う場合は
//! セッションを複数作る。同一セッションへの並行呼び出しはチャンネルの
//! 公平ロックで FIFO に直列化される。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::channel::{Exchange, RequestChannel};
use crate::config::EngineConfig;
use crate::error::BridgeError;
use crate::process::{EngineProcess, RecvOutcome};
use crate::protocol::{self, ProtocolDriver};
use crate::supervisor::{LivenessProbe, ProtocolTap};
use crate::types::{
    AnalysisSnapshot, EngineState, SearchBudget, SearchRequest, SearchResult, SessionStatus,
};

pub struct EngineSession {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: EngineConfig,
    driver: Arc<dyn ProtocolDriver>,
    pub(crate) channel: RequestChannel,
    status: Mutex<StatusCell>,
    next_request_id: AtomicU64,
}

struct StatusCell {
    state: EngineState,
    last_error: Option<String>,
}

impl SessionInner {
    pub(crate) fn state(&self) -> EngineState {
        self.status.lock().state
    }

    fn set_state(&self, state: EngineState) {
        let mut cell = self.status.lock();
        if cell.state != state {
            debug!("session state {:?} -> {:?}", cell.state, state);
            cell.state = state;
        }
    }

    fn fail(&self, state: EngineState, error: &str) {
        let mut cell = self.status.lock();
        debug!("session state {:?} -> {:?} ({error})", cell.state, state);
        cell.state = state;
        cell.last_error = Some(error.to_string());
    }

    pub(crate) fn mark_dead(&self, error: &str) {
        self.fail(EngineState::Dead, error);
    }
}

impl EngineSession {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_tap(config, ProtocolTap::disabled())
    }

    /// 全プロトコル行を観測するシンク付きで作る。
    pub fn with_tap(config: EngineConfig, tap: ProtocolTap) -> Self {
        let driver = protocol::driver_for(config.protocol);
        Self {
            inner: Arc::new(SessionInner {
                driver,
                channel: RequestChannel::new(tap),
                status: Mutex::new(StatusCell {
                    state: EngineState::Uninitialized,
                    last_error: None,
                }),
                next_request_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// プロセスを起動し、ハンドシェイクを通して `Ready` にする。
    ///
    /// spawn 前の失敗は `Uninitialized` に戻る（再試行可能）。spawn 後の
    /// ハンドシェイク失敗は中途半端に初期化されたプロセスを信用せず、
    /// kill して `Dead` で返す。`Terminated`・`Dead` からの再初期化は可。
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let mut slot = self.inner.channel.lock();
        {
            let cell = self.inner.status.lock();
            if !cell.state.can_initialize() {
                return Err(BridgeError::InvalidState {
                    state: cell.state,
                    operation: "initialize",
                });
            }
        }
        self.inner.set_state(EngineState::Initializing);

        let label = self.inner.config.label();
        let mut proc_ = match EngineProcess::spawn(&self.inner.config, &label) {
            Ok(p) => p,
            Err(e) => {
                self.inner.fail(EngineState::Uninitialized, &e.to_string());
                return Err(e);
            }
        };

        let handshake = self
            .inner
            .driver
            .handshake(&mut proc_, &self.inner.config, self.inner.channel.tap());
        match handshake {
            Ok(()) => {
                *slot = Some(proc_);
                self.inner.set_state(EngineState::Ready);
                MutexGuard::unlock_fair(slot);
                Ok(())
            }
            Err(e) => {
                proc_.kill_now();
                let e = match e {
                    BridgeError::HandshakeFailed(_) => e,
                    other => BridgeError::HandshakeFailed(other.to_string()),
                };
                self.inner.mark_dead(&e.to_string());
                Err(e)
            }
        }
    }

    /// デフォルト予算で1手求める。
    pub fn best_move(&self, position: &str) -> Result<SearchResult, BridgeError> {
        self.search(SearchRequest::new(position))
    }

    /// 1リクエストを投げ、terminal 行まで読み切って結果を返す。
    ///
    /// タイムアウト・プロセス死はセッションを `Dead` にして返す。以後は
    /// `initialize` し直すまでリクエストを受け付けない。
    pub fn search(&self, request: SearchRequest) -> Result<SearchResult, BridgeError> {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.inner.channel.lock();
        {
            let cell = self.inner.status.lock();
            if !cell.state.can_submit() {
                return Err(BridgeError::InvalidState {
                    state: cell.state,
                    operation: "search",
                });
            }
        }
        self.inner.set_state(EngineState::Busy);

        let budget = request.budget.unwrap_or(self.inner.config.default_budget);
        let commands =
            self.inner
                .driver
                .search_commands(&request.position, request.turn.as_deref(), budget);
        let soft_limit = match budget {
            SearchBudget::MoveTime(ms) => {
                Duration::from_millis(ms) + self.inner.config.stop_grace()
            }
            SearchBudget::Depth(_) => self.inner.config.request_timeout(),
        };

        let outcome = {
            let Some(proc_) = slot.as_mut() else {
                self.inner.mark_dead("no live process behind a Ready session");
                return Err(BridgeError::ProcessDied("process slot is empty".to_string()));
            };
            let mut exchange = Exchange {
                proc_,
                driver: &*self.inner.driver,
                tap: self.inner.channel.tap(),
            };
            exchange.submit(&commands, soft_limit, self.inner.config.stop_grace())
        };

        match outcome {
            Ok(submitted) => {
                let mut result = self.inner.driver.parse_search_response(&submitted.lines);
                result.request_id = request_id;
                result.elapsed_ms = submitted.elapsed_ms;
                result.timed_out = submitted.timed_out;
                if result.warning.is_some() {
                    warn!("request {request_id}: response degraded: {:?}", result.warning);
                }
                self.inner.set_state(EngineState::Ready);
                MutexGuard::unlock_fair(slot);
                Ok(result)
            }
            Err(e) => {
                if let Some(mut proc_) = slot.take() {
                    proc_.kill_now();
                }
                self.inner.mark_dead(&e.to_string());
                MutexGuard::unlock_fair(slot);
                Err(e)
            }
        }
    }

    /// 増分解析を開始する。返るハンドルが生きている間、このセッションの
    /// 排他権を握り続ける。キャンセルはタイムアウトと同じ
    /// stop → 猶予 → kill の経路をたどる。
    pub fn analyze(&self, position: &str, interval: Duration) -> Result<Analysis<'_>, BridgeError> {
        let mut slot = self.inner.channel.lock();
        {
            let cell = self.inner.status.lock();
            if !cell.state.can_submit() {
                return Err(BridgeError::InvalidState {
                    state: cell.state,
                    operation: "analyze",
                });
            }
        }
        self.inner.set_state(EngineState::Busy);

        let commands = self.inner.driver.analysis_commands(position, interval);
        let started = {
            let Some(proc_) = slot.as_mut() else {
                self.inner.mark_dead("no live process behind a Ready session");
                return Err(BridgeError::ProcessDied("process slot is empty".to_string()));
            };
            let mut exchange = Exchange {
                proc_,
                driver: &*self.inner.driver,
                tap: self.inner.channel.tap(),
            };
            exchange.drain_pending();
            commands.iter().try_for_each(|c| exchange.send(c))
        };
        if let Err(e) = started {
            if let Some(mut proc_) = slot.take() {
                proc_.kill_now();
            }
            self.inner.mark_dead(&e.to_string());
            return Err(e);
        }

        Ok(Analysis {
            inner: &self.inner,
            guard: Some(slot),
            finished: false,
        })
    }

    /// scoped release。プロセスが残っていれば quit → 猶予 → kill の順で
    /// 畳み、何度呼んでも安全。強制 kill は last_error に残す。
    pub fn shutdown(&self) {
        let mut slot = self.inner.channel.lock();
        if let Some(mut proc_) = slot.take() {
            // 取り残した出力は診断側へ流しきってから畳む
            while let Some(line) = proc_.try_recv_line() {
                self.inner.channel.tap().record_received(&line);
            }
            self.inner.channel.tap().record_sent(crate::process::QUIT_COMMAND);
            let forced = proc_.shutdown(self.inner.config.stop_grace());
            if forced {
                self.inner
                    .fail(EngineState::Terminated, &BridgeError::ShutdownTimeout.to_string());
            } else {
                self.inner.set_state(EngineState::Terminated);
            }
        } else {
            self.inner.set_state(EngineState::Terminated);
        }
        MutexGuard::unlock_fair(slot);
    }

    pub fn status(&self) -> SessionStatus {
        let cell = self.inner.status.lock();
        SessionStatus {
            state: cell.state,
            last_error: cell.last_error.clone(),
        }
    }

    /// リクエスト間のプロセス死を検出する監視スレッドを張る。
    /// 検出時はセッションを `Dead` にして `on_death` を呼ぶ。
    pub fn spawn_liveness_probe<F>(&self, interval: Duration, on_death: F) -> LivenessProbe
    where
        F: Fn() + Send + 'static,
    {
        LivenessProbe::spawn(Arc::downgrade(&self.inner), interval, on_death)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        // 明示 shutdown 済みなら何もすることはない
        if self.inner.state().expects_live_process() {
            self.shutdown();
        }
    }
}

/// 進行中の解析ストリームのハンドル。
///
/// 再開はできない。もう一度 `analyze` を呼んで新しいストリームを作る。
pub struct Analysis<'a> {
    inner: &'a Arc<SessionInner>,
    guard: Option<MutexGuard<'a, Option<EngineProcess>>>,
    finished: bool,
}

impl Analysis<'_> {
    /// 次のスナップショットを最大 `timeout` だけ待つ。
    ///
    /// `Ok(None)` は「期限内に何も来なかった」または「エンジン側が解析を
    /// 終えた」。後者かどうかは `is_finished` で区別できる。
    pub fn next_snapshot(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<AnalysisSnapshot>, BridgeError> {
        if self.finished {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let received = {
                let Some(guard) = self.guard.as_mut() else {
                    return Ok(None);
                };
                match guard.as_mut() {
                    Some(proc_) => proc_.recv_line(remaining),
                    None => RecvOutcome::Disconnected,
                }
            };
            match received {
                RecvOutcome::Line(line) => {
                    self.inner.channel.tap().record_received(&line);
                    if self.inner.driver.is_analysis_end(&line) {
                        // エンジン側の自然終了。排他権を返して Ready に戻す
                        self.finished = true;
                        self.inner.set_state(EngineState::Ready);
                        self.release_guard();
                        return Ok(None);
                    }
                    if let Some(snapshot) = self.inner.driver.parse_analysis_line(&line) {
                        return Ok(Some(snapshot));
                    }
                    // 解析行でもなく終了でもない行は診断のみ
                }
                RecvOutcome::TimedOut => {
                    // 期限判定はループ先頭で行う
                }
                RecvOutcome::Disconnected => {
                    self.finished = true;
                    let e = BridgeError::ProcessDied("stdout closed mid-analysis".to_string());
                    self.inner.mark_dead(&e.to_string());
                    self.kill_and_release();
                    return Err(e);
                }
            }
        }
    }

    /// エンジン側が解析を終えた（またはこちらで止めた）か。
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 解析を止めてセッションを `Ready` に戻す。
    pub fn cancel(mut self) -> Result<(), BridgeError> {
        self.stop_stream()
    }

    fn stop_stream(&mut self) -> Result<(), BridgeError> {
        if self.finished {
            self.release_guard();
            return Ok(());
        }
        self.finished = true;
        let stopped = {
            let Some(guard) = self.guard.as_mut() else {
                return Ok(());
            };
            match guard.as_mut() {
                Some(proc_) => {
                    let mut exchange = Exchange {
                        proc_,
                        driver: &*self.inner.driver,
                        tap: self.inner.channel.tap(),
                    };
                    exchange.stop_analysis(self.inner.config.stop_grace())
                }
                None => Ok(true),
            }
        };
        match stopped {
            Ok(true) => {
                self.inner.set_state(EngineState::Ready);
                self.release_guard();
                Ok(())
            }
            Ok(false) => {
                let e = BridgeError::RequestTimeout {
                    waited_ms: self.inner.config.stop_grace_ms,
                };
                self.inner.mark_dead(&e.to_string());
                self.kill_and_release();
                Err(e)
            }
            Err(e) => {
                self.inner.mark_dead(&e.to_string());
                self.kill_and_release();
                Err(e)
            }
        }
    }

    fn release_guard(&mut self) {
        if let Some(guard) = self.guard.take() {
            MutexGuard::unlock_fair(guard);
        }
    }

    fn kill_and_release(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            if let Some(mut proc_) = guard.take() {
                proc_.kill_now();
            }
            MutexGuard::unlock_fair(guard);
        }
    }
}

impl Drop for Analysis<'_> {
    fn drop(&mut self) {
        let _ = self.stop_stream();
    }
}
