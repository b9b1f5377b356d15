//! territory 系 mock エンジンに対するリクエスト往復の結合テスト。

mod common;

use common::gtp_config;
use kakehashi::{
    BridgeError, EngineSession, EngineState, ResultWarning, SearchBudget, SearchRequest,
};

#[test]
fn generate_move_round_trip() {
    let mut cfg = gtp_config(&[]);
    cfg.options.push(("komi".to_string(), "6.5".to_string()));
    let session = EngineSession::new(cfg);
    session.initialize().unwrap();
    assert_eq!(session.status().state, EngineState::Ready);

    let result = session
        .search(
            SearchRequest::new("play B Q16\nplay W D16")
                .turn("b")
                .budget(SearchBudget::MoveTime(1_000)),
        )
        .unwrap();
    assert_eq!(result.best_move.as_deref(), Some("D4"));
    assert!(result.warning.is_none());
    assert_eq!(session.status().state, EngineState::Ready);
    session.shutdown();
}

#[test]
fn empty_position_generates_from_the_opening() {
    let session = EngineSession::new(gtp_config(&[]));
    session.initialize().unwrap();
    let result = session
        .search(SearchRequest::new("").turn("w"))
        .unwrap();
    assert_eq!(result.best_move.as_deref(), Some("D4"));
    session.shutdown();
}

#[test]
fn empty_success_payload_degrades_to_a_warning() {
    let session = EngineSession::new(gtp_config(&["--omit-move"]));
    session.initialize().unwrap();
    let result = session.search(SearchRequest::new("").turn("b")).unwrap();
    assert_eq!(result.best_move, None);
    assert_eq!(result.warning, Some(ResultWarning::MalformedResponse));
    assert_eq!(session.status().state, EngineState::Ready);
    session.shutdown();
}

#[test]
fn rejected_handshake_parks_the_session_dead() {
    let session = EngineSession::new(gtp_config(&["--fail-handshake"]));
    let err = session.initialize().unwrap_err();
    // 失敗マーカーでの拒否はタイムアウトを待たず即座に失敗する
    assert!(matches!(err, BridgeError::HandshakeFailed(_)));
    assert_eq!(session.status().state, EngineState::Dead);
}

#[test]
fn successive_requests_reuse_the_same_process() {
    let session = EngineSession::new(gtp_config(&["--serial-moves"]));
    session.initialize().unwrap();
    let first = session.search(SearchRequest::new("").turn("b")).unwrap();
    let second = session.search(SearchRequest::new("play B D4").turn("w")).unwrap();
    assert_eq!(first.best_move.as_deref(), Some("m1"));
    assert_eq!(second.best_move.as_deref(), Some("m2"));
    session.shutdown();
}
