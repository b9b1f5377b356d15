//! 観測用のシンクと生存監視。
//!
//! どちらも RequestChannel の邪魔をしないことが最優先で、シンクは有界
//! キュー + try_send、監視は try_lock でリクエスト中のスロットを避ける。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel as chan;
use log::warn;

use crate::session::SessionInner;
use crate::types::{EngineState, ProtocolLine};

pub const DEFAULT_TAP_CAPACITY: usize = 1024;

/// 生プロトコル行の観測シンク。
///
/// 行は有界キューに `try_send` され、専用スレッドがコールバックへ流す。
/// キューが満杯なら行は捨てる。コールバックの panic はスレッド内で
/// 握りつぶす。送受信経路をブロックする手段がない構造にしてある。
pub struct ProtocolTap {
    tx: Option<chan::Sender<ProtocolLine>>,
    worker: Option<JoinHandle<()>>,
}

impl ProtocolTap {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ProtocolLine) + Send + 'static,
    {
        Self::with_capacity(callback, DEFAULT_TAP_CAPACITY)
    }

    pub fn with_capacity<F>(callback: F, capacity: usize) -> Self
    where
        F: Fn(&ProtocolLine) + Send + 'static,
    {
        let (tx, rx) = chan::bounded::<ProtocolLine>(capacity);
        let worker = thread::spawn(move || {
            for line in rx.iter() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&line)));
                if outcome.is_err() {
                    warn!("protocol tap callback panicked, line dropped");
                }
            }
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// 何も観測しないシンク
    pub fn disabled() -> Self {
        Self {
            tx: None,
            worker: None,
        }
    }

    pub fn record_sent(&self, text: &str) {
        self.push(ProtocolLine::sent(text));
    }

    pub fn record_received(&self, text: &str) {
        self.push(ProtocolLine::received(text));
    }

    fn push(&self, line: ProtocolLine) {
        if let Some(tx) = &self.tx {
            // 満杯なら捨てる
            let _ = tx.try_send(line);
        }
    }
}

impl Drop for ProtocolTap {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// リクエスト間のプロセス死を検出する監視スレッドのハンドル。
///
/// drop で停止を指示する。スレッド自体はセッションの Weak 参照しか
/// 持たないので、セッションが落ちれば次の tick で勝手に終わる。
pub struct LivenessProbe {
    stop: std::sync::Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl LivenessProbe {
    pub(crate) fn spawn<F>(inner: Weak<SessionInner>, interval: Duration, on_death: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = std::sync::Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            loop {
                thread::sleep(interval);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let state = inner.state();
                if state == EngineState::Terminated {
                    break;
                }
                if state != EngineState::Ready {
                    // Busy はリクエスト側が死を検出する。他の状態は監視対象外
                    continue;
                }
                // リクエスト中はスロットに触らない
                let Some(mut slot) = inner.channel.try_lock() else {
                    continue;
                };
                let vanished = match slot.as_mut() {
                    Some(proc_) => !proc_.is_alive(),
                    None => true,
                };
                if !vanished {
                    continue;
                }
                warn!("engine process vanished between requests");
                if let Some(proc_) = slot.take() {
                    // 残骸の出力は診断側へ流しきる
                    while let Some(line) = proc_.try_recv_line() {
                        inner.channel.tap().record_received(&line);
                    }
                }
                drop(slot);
                inner.mark_dead("process exited unexpectedly between requests");
                on_death();
            }
        });
        Self {
            stop,
            _handle: handle,
        }
    }
}

impl Drop for LivenessProbe {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Instant;

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn tap_delivers_lines_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let tap = ProtocolTap::new(move |line: &ProtocolLine| {
            seen_cb
                .lock()
                .unwrap()
                .push((line.direction, line.text.clone()));
        });
        tap.record_sent("go movetime 100");
        tap.record_received("bestmove e2e4");
        assert!(wait_until(1_000, || seen.lock().unwrap().len() == 2));
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (crate::types::LineDirection::Sent, "go movetime 100".to_string())
        );
        assert_eq!(
            seen[1],
            (
                crate::types::LineDirection::Received,
                "bestmove e2e4".to_string()
            )
        );
    }

    #[test]
    fn tap_survives_panicking_callback() {
        let count = Arc::new(Mutex::new(0usize));
        let count_cb = count.clone();
        let tap = ProtocolTap::new(move |line: &ProtocolLine| {
            if line.text == "boom" {
                panic!("observer bug");
            }
            *count_cb.lock().unwrap() += 1;
        });
        tap.record_received("boom");
        tap.record_received("fine");
        assert!(wait_until(1_000, || *count.lock().unwrap() == 1));
    }

    #[test]
    fn disabled_tap_is_a_no_op() {
        let tap = ProtocolTap::disabled();
        tap.record_sent("anything");
        tap.record_received("anything");
    }
}
