//! 増分解析ストリームとキャンセル経路の結合テスト。

mod common;

use common::{gtp_config, uci_config};
use kakehashi::{BridgeError, EngineSession, EngineState};
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn movesearch_analysis_streams_snapshots_until_cancelled() {
    let session = EngineSession::new(uci_config(&[]));
    session.initialize().unwrap();

    let mut analysis = session
        .analyze("startpos", Duration::from_millis(20))
        .unwrap();
    assert_eq!(session.status().state, EngineState::Busy);

    let first = analysis
        .next_snapshot(Duration::from_secs(1))
        .unwrap()
        .expect("first snapshot");
    let second = analysis
        .next_snapshot(Duration::from_secs(1))
        .unwrap()
        .expect("second snapshot");
    assert!(first.depth.is_some());
    assert!(second.depth.is_some());
    // mock は深さを1ずつ上げながら流す
    assert!(second.depth > first.depth);

    analysis.cancel().expect("clean cancel");
    assert_eq!(session.status().state, EngineState::Ready);

    // キャンセル後は同じセッションで普通の探索ができる
    let result = session.best_move("startpos").unwrap();
    assert_eq!(result.best_move.as_deref(), Some("e2e4"));
    session.shutdown();
}

#[test]
#[serial]
fn territory_analysis_reports_visits() {
    let session = EngineSession::new(gtp_config(&[]));
    session.initialize().unwrap();

    let mut analysis = session
        .analyze("play B Q16", Duration::from_millis(20))
        .unwrap();
    let snapshot = analysis
        .next_snapshot(Duration::from_secs(1))
        .unwrap()
        .expect("snapshot");
    assert!(snapshot.visits.is_some());
    assert!(snapshot.winrate.is_some());
    assert!(!snapshot.pv.is_empty());

    analysis.cancel().expect("clean cancel");
    assert_eq!(session.status().state, EngineState::Ready);

    let result = session
        .search(kakehashi::SearchRequest::new("").turn("b"))
        .unwrap();
    assert_eq!(result.best_move.as_deref(), Some("D4"));
    session.shutdown();
}

#[test]
#[serial]
fn dropping_the_handle_cancels_the_stream() {
    let session = EngineSession::new(uci_config(&[]));
    session.initialize().unwrap();
    {
        let mut analysis = session
            .analyze("startpos", Duration::from_millis(20))
            .unwrap();
        let _ = analysis.next_snapshot(Duration::from_secs(1)).unwrap();
        // cancel せずに drop する
    }
    assert_eq!(session.status().state, EngineState::Ready);
    let result = session.best_move("startpos").unwrap();
    assert_eq!(result.best_move.as_deref(), Some("e2e4"));
    session.shutdown();
}

#[test]
fn analyze_requires_a_ready_session() {
    let session = EngineSession::new(uci_config(&[]));
    let err = session
        .analyze("startpos", Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidState { .. }));
}
