//! Common test utilities for bridge integration tests

#![allow(dead_code)] // These utilities may be used by various test files

use std::thread;
use std::time::{Duration, Instant};

use kakehashi::{EngineConfig, ProtocolFamily, SearchBudget};

pub fn mock_engine_path() -> &'static str {
    env!("CARGO_BIN_EXE_mock_engine")
}

/// CI で待ちすぎないよう、mock 相手は短いタイムアウトと予算に寄せる。
pub fn uci_config(extra_args: &[&str]) -> EngineConfig {
    let mut cfg = EngineConfig::new(mock_engine_path(), ProtocolFamily::MoveSearch);
    cfg.args = extra_args.iter().map(|s| s.to_string()).collect();
    cfg.default_budget = SearchBudget::MoveTime(150);
    cfg.handshake_timeout_ms = 2_000;
    cfg.request_timeout_ms = 3_000;
    cfg.stop_grace_ms = 300;
    cfg
}

pub fn gtp_config(extra_args: &[&str]) -> EngineConfig {
    let mut cfg = EngineConfig::new(mock_engine_path(), ProtocolFamily::Territory);
    cfg.args = std::iter::once("--protocol")
        .chain(std::iter::once("gtp"))
        .chain(extra_args.iter().copied())
        .map(String::from)
        .collect();
    cfg.default_budget = SearchBudget::MoveTime(150);
    cfg.handshake_timeout_ms = 2_000;
    cfg.request_timeout_ms = 3_000;
    cfg.stop_grace_ms = 300;
    cfg
}

/// 条件成立までポーリングで待つ。成立したら true。
pub fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}
