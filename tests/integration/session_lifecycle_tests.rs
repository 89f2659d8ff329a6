//! Session lifecycle tests against the direct session API.
//!
//! Uses the `cat` stub engine throughout: whatever is submitted comes
//! back as output, so transcript shape is deterministic.

use std::time::Duration;

use repl_relay::session::{EvalSession, SessionState, SubmitOutcome};
use repl_relay::transcript::EntryKind;
use repl_relay::{AppError, GlobalConfig};

use super::test_helpers::stub_config;

const SETTLE: Duration = Duration::from_millis(300);

#[tokio::test]
async fn submit_logs_input_then_echoed_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    let outcome = session.submit("1+1", None, SETTLE).await.expect("submit");
    assert_eq!(outcome, SubmitOutcome::Evaluated);

    let entries = session.transcript().await;
    assert_eq!(entries.len(), 2, "one input entry, one output entry");
    assert_eq!(entries[0].kind, EntryKind::Input);
    assert_eq!(entries[0].content, "1+1\n");
    assert_eq!(entries[1].kind, EntryKind::Output);
    assert!(entries[1].content.contains("1+1"));
    assert!(entries[0].timestamp <= entries[1].timestamp);
}

#[tokio::test]
async fn display_script_replaces_logged_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    session
        .submit("1+1", Some("one plus one"), SETTLE)
        .await
        .expect("submit");

    let entries = session.transcript().await;
    assert_eq!(entries[0].content, "one plus one\n");
    // The engine still evaluated the real script.
    assert!(entries[1].content.contains("1+1"));
}

#[tokio::test]
async fn transcript_entries_follow_call_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    for script in ["first", "second", "third"] {
        session.submit(script, None, SETTLE).await.expect("submit");
    }

    let entries = session.transcript().await;
    let inputs: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Input)
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(inputs, vec!["first\n", "second\n", "third\n"]);
    for pair in entries.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn clear_empties_the_transcript_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    session.submit("1+1", None, SETTLE).await.expect("submit");
    session.clear();

    let entries = session.transcript().await;
    assert!(entries.is_empty(), "clear wipes prior history");
    assert_eq!(session.state(), SessionState::Active);

    // The engine is untouched: further submissions still work.
    session.submit("2+2", None, SETTLE).await.expect("submit after clear");
    assert!(!session.transcript().await.is_empty());
}

/// Output produced after a zero-delay drain is picked up by the next
/// transcript read rather than being lost.
#[tokio::test]
async fn late_output_is_captured_on_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    session
        .submit("late", None, Duration::ZERO)
        .await
        .expect("submit");
    tokio::time::sleep(SETTLE).await;

    let entries = session.transcript().await;
    assert!(
        entries
            .iter()
            .any(|e| e.kind == EntryKind::Output && e.content.contains("late")),
        "read triggers a final best-effort drain"
    );
}

#[tokio::test]
async fn exit_sentinel_terminates_instead_of_evaluating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    session.submit("1+1", None, SETTLE).await.expect("submit");
    let outcome = session
        .submit("  .exit  ", None, Duration::from_millis(50))
        .await
        .expect("exit sentinel");
    assert_eq!(outcome, SubmitOutcome::Terminated);
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(session.transcript().await.is_empty(), "termination clears the transcript");

    let err = session
        .submit("2+2", None, SETTLE)
        .await
        .expect_err("terminated session refuses input");
    assert!(matches!(err, AppError::Engine(_)));
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    session.terminate(Duration::from_millis(50)).await;
    session.terminate(Duration::from_millis(50)).await;
    assert_eq!(session.state(), SessionState::Terminated);
}

/// A crashed engine is reported as a single transcript entry and the
/// session refuses further submissions; it never restarts on its own.
#[tokio::test]
async fn dead_engine_is_reported_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = stub_config(dir.path());
    // `true` exits immediately: an engine that dies right after spawn.
    config.engine_command = "true".into();
    let session = EvalSession::spawn("abc123", &config).expect("spawn session");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = session
        .submit("1+1", None, Duration::ZERO)
        .await
        .expect_err("dead engine refuses input");
    assert!(matches!(err, AppError::Engine(_)));

    let exit_notices = |entries: &[repl_relay::transcript::TranscriptEntry]| {
        entries
            .iter()
            .filter(|e| e.content.starts_with("engine exited"))
            .count()
    };

    let entries = session.transcript().await;
    assert_eq!(exit_notices(&entries), 1, "exit notice appears exactly once");

    // A second failed submission does not duplicate the notice.
    let _ = session.submit("2+2", None, Duration::ZERO).await;
    let entries = session.transcript().await;
    assert_eq!(exit_notices(&entries), 1);
}

#[tokio::test]
async fn sessions_do_not_share_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = stub_config(dir.path());
    let a = EvalSession::spawn("aaaa", &config).expect("spawn a");
    let b = EvalSession::spawn("bbbb", &config).expect("spawn b");

    a.submit("alpha", None, SETTLE).await.expect("submit a");
    b.submit("beta", None, SETTLE).await.expect("submit b");

    let a_entries = a.transcript().await;
    let b_entries = b.transcript().await;
    assert!(a_entries.iter().all(|e| !e.content.contains("beta")));
    assert!(b_entries.iter().all(|e| !e.content.contains("alpha")));
}
