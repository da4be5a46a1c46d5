//! Integration tests for the status recorder: a live runner's projected
//! status and pending prompt reach the session table.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use session_runner::launcher::scripted::{InputMatch, ScriptStep, ScriptedLauncher};
use session_runner::launcher::LaunchOptions;
use session_runner::models::permission::PermissionDecision;
use session_runner::models::session::{Session, SessionStatus};
use session_runner::persistence::db;
use session_runner::persistence::session_repo::SessionRepo;
use session_runner::projector::spawn_status_recorder;

use super::test_helpers::{
    assistant_text, collect_until_exit, permission_request, result_line, scripted_runner,
    system_init, test_settings, EXIT_TIMEOUT,
};

async fn repo_with_session(id: &str) -> SessionRepo {
    let repo = SessionRepo::new(Arc::new(db::connect_memory().await.expect("db")));
    repo.create(&Session::new(id.to_owned(), "/work".to_owned(), None))
        .await
        .expect("create");
    repo
}

async fn wait_for_status(repo: &SessionRepo, id: &str, status: SessionStatus) -> Session {
    tokio::time::timeout(EXIT_TIMEOUT, async {
        loop {
            let session = repo.get_by_id(id).await.expect("fetch");
            if session.status == status {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session {id} never reached {status}"))
}

#[tokio::test]
async fn permission_wait_is_recorded_then_cleared() {
    let repo = repo_with_session("s1").await;
    let launcher = ScriptedLauncher::new(vec![
        system_init("ext-1"),
        permission_request("perm-1", "Bash", json!({ "command": "make" })),
        ScriptStep::AwaitInput(InputMatch::ControlResponseFor("perm-1".into())),
        assistant_text("building"),
        ScriptStep::Sleep(Duration::from_millis(300)),
        result_line("built"),
    ]);
    let (runner, mut events) = scripted_runner("s1", &launcher, test_settings());
    let recorder = spawn_status_recorder(repo.clone(), "s1".into(), runner.subscribe());

    runner.start("build it", LaunchOptions::default()).await.expect("start");

    let waiting = wait_for_status(&repo, "s1", SessionStatus::WaitingPermission).await;
    let prompt = waiting.pending_prompt.expect("prompt persisted for redisplay");
    assert_eq!(prompt.request_id, "perm-1");

    assert!(runner.respond_permission("perm-1", PermissionDecision::allow()).await);
    let running = wait_for_status(&repo, "s1", SessionStatus::Running).await;
    assert_eq!(running.pending_prompt, None);

    collect_until_exit(&mut events).await;
    tokio::time::timeout(EXIT_TIMEOUT, recorder)
        .await
        .expect("recorder stops after exit")
        .expect("join");

    let finished = repo.get_by_id("s1").await.expect("fetch");
    assert_eq!(finished.status, SessionStatus::Idle);
    assert_eq!(finished.pending_prompt, None);
    assert_eq!(finished.resume_id.as_deref(), Some("ext-1"));
}

#[tokio::test]
async fn failed_session_is_recorded_idle() {
    let repo = repo_with_session("s2").await;
    let launcher = ScriptedLauncher::new(vec![
        assistant_text("working"),
        ScriptStep::Sleep(Duration::from_millis(200)),
        ScriptStep::Exit(2),
    ]);
    let (runner, mut events) = scripted_runner("s2", &launcher, test_settings());
    let recorder = spawn_status_recorder(repo.clone(), "s2".into(), runner.subscribe());

    runner.start("go", LaunchOptions::default()).await.expect("start");
    wait_for_status(&repo, "s2", SessionStatus::Running).await;

    collect_until_exit(&mut events).await;
    tokio::time::timeout(EXIT_TIMEOUT, recorder)
        .await
        .expect("recorder stops after exit")
        .expect("join");

    assert_eq!(
        repo.get_by_id("s2").await.expect("fetch").status,
        SessionStatus::Idle
    );
}
