//! Integration tests for the session repository on in-memory and file-backed
//! `SQLite`.

use std::sync::Arc;

use serde_json::json;

use session_runner::models::prompt::{PendingPrompt, PromptKind, Question};
use session_runner::models::session::{Session, SessionStatus};
use session_runner::persistence::db;
use session_runner::persistence::session_repo::SessionRepo;
use session_runner::AppError;

async fn memory_repo() -> SessionRepo {
    let pool = Arc::new(db::connect_memory().await.expect("in-memory db"));
    SessionRepo::new(pool)
}

fn session(id: &str) -> Session {
    Session::new(id.to_owned(), "/work".to_owned(), None)
}

fn permission_prompt(id: &str) -> PendingPrompt {
    PendingPrompt {
        request_id: id.to_owned(),
        kind: PromptKind::Permission {
            tool_name: "Bash".into(),
            input: json!({ "command": "rm -rf build" }),
        },
    }
}

#[tokio::test]
async fn create_and_fetch_round_trips() {
    let repo = memory_repo().await;

    let created = repo
        .create(&Session::new("s1".into(), "/work".into(), Some("ext-1".into())))
        .await
        .expect("create");

    assert_eq!(created.id, "s1");
    assert_eq!(created.status, SessionStatus::Idle);
    assert_eq!(created.resume_id.as_deref(), Some("ext-1"));
    assert_eq!(repo.get_by_id("s1").await.expect("fetch"), created);
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let repo = memory_repo().await;

    assert!(matches!(
        repo.get_by_id("ghost").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        repo.update_projection("ghost", SessionStatus::Running, None)
            .await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn recreate_resets_status_and_keeps_creation_time_and_resume_id() {
    let repo = memory_repo().await;
    let first = repo
        .create(&Session::new("s1".into(), "/work".into(), Some("ext-1".into())))
        .await
        .expect("create");
    repo.update_projection("s1", SessionStatus::WaitingPermission, Some(&permission_prompt("p1")))
        .await
        .expect("project");

    let again = repo.create(&session("s1")).await.expect("recreate");

    assert_eq!(again.created_at, first.created_at);
    assert_eq!(again.status, SessionStatus::Idle);
    assert_eq!(again.pending_prompt, None);
    assert_eq!(again.resume_id.as_deref(), Some("ext-1"));
}

#[tokio::test]
async fn projection_persists_pending_prompt() {
    let repo = memory_repo().await;
    repo.create(&session("s1")).await.expect("create");

    let question = PendingPrompt {
        request_id: "toolu_1".into(),
        kind: PromptKind::Question {
            questions: vec![Question {
                question: "Which database?".into(),
                header: Some("DB".into()),
                options: Vec::new(),
                multi_select: false,
            }],
        },
    };
    repo.update_projection("s1", SessionStatus::WaitingQuestion, Some(&question))
        .await
        .expect("project");

    let stored = repo.get_by_id("s1").await.expect("fetch");
    assert_eq!(stored.status, SessionStatus::WaitingQuestion);
    assert_eq!(stored.pending_prompt, Some(question));

    repo.update_projection("s1", SessionStatus::Running, None)
        .await
        .expect("clear");
    let stored = repo.get_by_id("s1").await.expect("fetch");
    assert_eq!(stored.status, SessionStatus::Running);
    assert_eq!(stored.pending_prompt, None);
}

#[tokio::test]
async fn resume_id_is_recorded() {
    let repo = memory_repo().await;
    repo.create(&session("s1")).await.expect("create");

    repo.set_resume_id("s1", Some("ext-77")).await.expect("set");

    let stored = repo.get_by_id("s1").await.expect("fetch");
    assert_eq!(stored.resume_id.as_deref(), Some("ext-77"));
}

#[tokio::test]
async fn list_by_status_filters() {
    let repo = memory_repo().await;
    for id in ["a", "b", "c"] {
        repo.create(&session(id)).await.expect("create");
    }
    repo.update_projection("a", SessionStatus::Running, None)
        .await
        .expect("a");
    repo.update_projection("c", SessionStatus::Running, None)
        .await
        .expect("c");

    let running = repo
        .list_by_status(SessionStatus::Running)
        .await
        .expect("list");
    let mut ids: Vec<&str> = running.iter().map(|s| s.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["a", "c"]);

    let idle = repo.list_by_status(SessionStatus::Idle).await.expect("list");
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].id, "b");
}

#[tokio::test]
async fn reset_stale_idles_every_live_session() {
    let repo = memory_repo().await;
    for id in ["a", "b", "c"] {
        repo.create(&session(id)).await.expect("create");
    }
    repo.update_projection("a", SessionStatus::Running, None)
        .await
        .expect("a");
    repo.update_projection("b", SessionStatus::WaitingPermission, Some(&permission_prompt("p1")))
        .await
        .expect("b");

    let reset = repo.reset_stale().await.expect("reset");

    assert_eq!(reset, 2);
    for id in ["a", "b", "c"] {
        let stored = repo.get_by_id(id).await.expect("fetch");
        assert_eq!(stored.status, SessionStatus::Idle, "session {id}");
        assert_eq!(stored.pending_prompt, None, "session {id}");
    }
    assert_eq!(repo.reset_stale().await.expect("second reset"), 0);
}

#[tokio::test]
async fn file_database_survives_reconnect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("sessions.db");

    {
        let pool = db::connect(&path).await.expect("connect");
        let repo = SessionRepo::new(Arc::new(pool.clone()));
        repo.create(&session("s1")).await.expect("create");
        repo.update_projection("s1", SessionStatus::Running, None)
            .await
            .expect("project");
        pool.close().await;
    }

    let repo = SessionRepo::new(Arc::new(db::connect(&path).await.expect("reconnect")));
    let stored = repo.get_by_id("s1").await.expect("fetch");
    assert_eq!(stored.status, SessionStatus::Running);
}
