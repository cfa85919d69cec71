use axum::http::StatusCode;
use forge_core::config::{Config, JobDefinition};
use forge_core::quest::QuestTemplate;
use forge_core::rules::{BadgeDefinition, Predicate};
use forge_core::types::QuestCategory;
use forge_server::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write a project config with one side quest and one badge, then open it.
fn init_project(dir: &TempDir) -> AppState {
    let mut config = Config::new("test-guild");
    config.quests.push(QuestTemplate {
        slug: "tidy".into(),
        title: "Tidy the backlog".into(),
        description: None,
        category: QuestCategory::Side,
        xp: 200,
        skill_xp: BTreeMap::new(),
        tags: vec!["chore".into()],
        requires: None,
        min_level: 1,
    });
    config.badges.push(BadgeDefinition {
        slug: "first-steps".into(),
        title: "First Steps".into(),
        description: None,
        xp_reward: 10,
        predicate: Predicate::TotalXpAtLeast { xp: 100 },
    });
    config.jobs.classes.push(JobDefinition {
        slug: "backend".into(),
        title: "Backend Engineer".into(),
        skills: Vec::new(),
    });
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.save(dir.path()).unwrap();
    AppState::open(dir.path()).unwrap()
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
    send(state, "GET", uri, None).await
}

async fn post_json(
    state: &AppState,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(state, "POST", uri, Some(body)).await
}

fn exercise(key: &str, user: &str, xp: u64) -> serde_json::Value {
    json!({
        "idempotency_key": key,
        "user_id": user,
        "source": "manual_exercise",
        "payload": { "kind": "exercise", "skill": "rust", "xp": xp },
    })
}

// ---------------------------------------------------------------------------
// Events and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_event_updates_status_and_awards_badge() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, body) = post_json(&state, "/api/events", exercise("ex-1", "octocat", 150)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);
    assert_eq!(body["sequence"], 1);
    assert_eq!(body["unlocked_badges"], json!(["first-steps"]));

    let (status, snap) = get(&state, "/api/players/octocat/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snap["xp"], 160);
    assert_eq!(snap["badges"], json!(["first-steps"]));
}

#[tokio::test]
async fn duplicate_event_is_a_successful_no_op() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (_, first) = post_json(&state, "/api/events", exercise("ex-1", "octocat", 50)).await;
    let (status, second) = post_json(&state, "/api/events", exercise("ex-1", "octocat", 50)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["accepted"], false);
    assert_eq!(second["sequence"], first["sequence"]);

    let (_, snap) = get(&state, "/api/players/octocat/status").await;
    assert_eq!(snap["xp"], 50);
}

#[tokio::test]
async fn external_badge_event_is_rejected() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, body) = post_json(
        &state,
        "/api/events",
        json!({
            "idempotency_key": "sneaky",
            "user_id": "octocat",
            "source": "badge_trigger",
            "payload": { "kind": "badge_award", "badge": "first-steps", "xp": 10 },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("validation"));

    let (_, events) = get(&state, "/api/players/octocat/events").await;
    assert_eq!(events, json!([]));
}

#[tokio::test]
async fn unknown_player_starts_at_level_one() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, snap) = get(&state, "/api/players/newcomer/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snap["level"], 1);
    assert_eq!(snap["xp"], 0);
    assert_eq!(snap["job"], "apprentice");
}

#[tokio::test]
async fn invalid_user_slug_is_400() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (status, _) = get(&state, "/api/players/Not%20A%20Slug/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_honours_after_and_verify_reports_clean_cache() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    post_json(&state, "/api/events", exercise("ex-1", "octocat", 20)).await;
    post_json(&state, "/api/events", exercise("ex-2", "octocat", 30)).await;

    let (_, all) = get(&state, "/api/players/octocat/events").await;
    assert_eq!(all.as_array().unwrap().len(), 2);
    let (_, tail) = get(&state, "/api/players/octocat/events?after=1").await;
    assert_eq!(tail.as_array().unwrap().len(), 1);
    assert_eq!(tail[0]["sequence"], 2);

    let (status, report) = get(&state, "/api/players/octocat/verify").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["events"], 2);

    let (status, rebuilt) = send(&state, "POST", "/api/players/octocat/rebuild", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rebuilt["xp"], 50);

    let (_, players) = get(&state, "/api/players").await;
    assert_eq!(players, json!(["octocat"]));
}

#[tokio::test]
async fn job_change_is_gated() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    post_json(&state, "/api/events", exercise("ex-1", "octocat", 20)).await;

    let (status, _) = post_json(&state, "/api/players/octocat/job", json!({ "to": "apprentice" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&state, "/api/players/octocat/job", json!({ "to": "wizard" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_json(&state, "/api/players/octocat/job", json!({ "to": "backend" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (_, snap) = get(&state, "/api/players/octocat/status").await;
    assert_eq!(snap["job"], "apprentice");
}

// ---------------------------------------------------------------------------
// Quests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quest_lifecycle_grants_xp_once() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, offered) = send(&state, "POST", "/api/players/octocat/quests/offer", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offered[0]["id"], "side:tidy");

    let (_, again) = send(&state, "POST", "/api/players/octocat/quests/offer", None).await;
    assert_eq!(again, json!([]));

    let claim = json!({ "idempotency_key": "claim-1" });
    let (status, _) = post_json(&state, "/api/players/octocat/quests/side:tidy/claim", claim.clone()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, started) =
        send(&state, "POST", "/api/players/octocat/quests/side:tidy/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["state"], "in_progress");
    send(&state, "POST", "/api/players/octocat/quests/side:tidy/complete", None).await;

    let (status, first) =
        post_json(&state, "/api/players/octocat/quests/side:tidy/claim", claim.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["claimed_now"], true);
    assert_eq!(first["instance"]["state"], "claimed");

    let (_, second) = post_json(&state, "/api/players/octocat/quests/side:tidy/claim", claim).await;
    assert_eq!(second["claimed_now"], false);

    let (_, snap) = get(&state, "/api/players/octocat/status").await;
    // 200 from the quest plus the first-steps badge reward.
    assert_eq!(snap["xp"], 210);

    let (_, claimed) = get(&state, "/api/players/octocat/quests?state=claimed").await;
    assert_eq!(claimed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_quest_is_404() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let (status, _) = send(&state, "POST", "/api/players/octocat/quests/side:nope/start", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Proposals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn proposals_and_votes() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);
    let proposal = json!({ "id": "dark-mode", "title": "Dark mode", "author": "octocat" });

    let (status, created) = post_json(&state, "/api/proposals", proposal.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["decision"], "pending");

    let (status, _) = post_json(&state, "/api/proposals", proposal).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let vote = json!({ "user_id": "hubot", "direction": "up" });
    let (status, first) = post_json(&state, "/api/proposals/dark-mode/votes", vote.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["accepted"], true);
    let (_, second) = post_json(&state, "/api/proposals/dark-mode/votes", vote).await;
    assert_eq!(second["accepted"], false);

    let (status, detail) = get(&state, "/api/proposals/dark-mode").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["votes"].as_array().unwrap().len(), 1);
    assert_eq!(detail["tally"]["up"], 1);

    let (_, list) = get(&state, "/api/proposals").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = get(&state, "/api/proposals/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Assessments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inline_assessment_job_runs_to_success() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, job) = post_json(
        &state,
        "/api/assessments",
        json!({
            "user_id": "octocat",
            "snapshot": {
                "user_id": "octocat",
                "commit_count": 120,
                "languages": { "Rust": 40, "Go": 10 },
                "pr_count": 5,
            },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = job["id"].as_str().unwrap().to_string();

    let mut last = serde_json::Value::Null;
    for _ in 0..200 {
        let (_, current) = get(&state, &format!("/api/assessments/{id}")).await;
        if current["status"]["type"] != "pending" && current["status"]["type"] != "running" {
            last = current;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"]["type"], "succeeded", "{last}");
    assert_eq!(last["status"]["accepted"], true);

    let (_, snap) = get(&state, "/api/players/octocat/status").await;
    assert!(snap["xp"].as_u64().unwrap() > 0);

    // Cancelling a finished job is refused.
    let (status, _) = send(&state, "DELETE", &format!("/api/assessments/{id}"), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn assessment_lookups_validate_ids() {
    let dir = TempDir::new().unwrap();
    let state = init_project(&dir);

    let (status, _) = get(&state, "/api/assessments/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let (status, _) = get(&state, &format!("/api/assessments/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(
        &state,
        "/api/assessments",
        json!({ "user_id": "octocat", "snapshot": { "user_id": "hubot" } }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
