use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cicd_hooks::api::app_router;
use cicd_hooks::db::StoreOp;
use cicd_hooks::{AppConfig, AppState, SharedState};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const REPO_URL: &str = "https://github.com/acme/app.git";

const BASE: &str = r#"
[[scm_context]]
name = "github:github.com"
display_name = "github"

[[pipeline]]
id = 1
checkout_url = "https://github.com/acme/app.git"
branch = "master"

[pipeline.workflow_graph]
nodes = [{ name = "~commit" }, { name = "~pr" }, { name = "~tag" }, { name = "main" }]
edges = [
    { src = "~commit", dest = "main" },
    { src = "~pr", dest = "main" },
    { src = "~tag", dest = "main" },
]

[[user]]
username = "alice"
scm_context = "github:github.com"
token = "alice-token"

[[user]]
username = "sd-buildbot"
scm_context = "github:github.com"
token = "bot-token"

[[branch_head]]
checkout_url = "https://github.com/acme/app.git"
name = "master"
sha = "cfg-sha"

[[tag]]
checkout_url = "https://github.com/acme/app.git"
name = "v1.0.0"
sha = "tag-sha"
"#;

fn setup(webhooks: &str) -> (SharedState, Router) {
    setup_with(webhooks, BASE)
}

fn setup_with(webhooks: &str, base: &str) -> (SharedState, Router) {
    let config = AppConfig::from_toml(&format!("{}\n{}", webhooks, base)).unwrap();
    let state = Arc::new(AppState::new(config, "unused.toml"));
    let app = app_router(state.clone());
    (state, app)
}

async fn deliver(app: &Router, event: &str, payload: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-github-delivery", "delivery-1")
        .body(Body::from(payload.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn push(sender: &str, message: &str) -> Value {
    json!({
        "ref": "refs/heads/master",
        "after": "push-sha",
        "repository": { "clone_url": REPO_URL },
        "sender": { "login": sender },
        "head_commit": { "message": message },
        "commits": [
            {
                "author": { "username": sender },
                "added": ["README.md"],
                "modified": [],
                "removed": []
            }
        ]
    })
}

fn pull_request(action: &str, number: u64, head_repo: &str) -> Value {
    json!({
        "action": action,
        "number": number,
        "pull_request": {
            "title": "Add feature",
            "merged": false,
            "head": { "sha": "pr-sha", "repo": { "full_name": head_repo } },
            "base": { "ref": "master", "repo": { "full_name": "acme/app" } }
        },
        "repository": { "clone_url": REPO_URL },
        "sender": { "login": "alice" }
    })
}

#[tokio::test]
async fn push_to_tracked_branch_creates_event() {
    let (state, app) = setup("");

    let (status, body) = deliver(&app, "push", &push("alice", "fix")).await;

    assert_eq!(status, StatusCode::CREATED);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["startFrom"], "~commit");
    assert_eq!(events[0]["sha"], "push-sha");
    assert_eq!(events[0]["configPipelineSha"], "cfg-sha");
    assert_eq!(events[0]["type"], "pipeline");
    assert_eq!(events[0]["webhooks"], true);
    assert_eq!(events[0]["causeMessage"], "Merged by alice");
    assert_eq!(events[0]["changedFiles"], json!(["README.md"]));

    assert!(state.store.job_by_name(1, "main").await.is_some());
}

#[tokio::test]
async fn ignored_committer_with_skip_marker_creates_skipped_event() {
    let (_state, app) = setup("[webhooks]\nignore_commits_by = [\"batman\"]\n");

    let (status, body) = deliver(&app, "push", &push("batman", "foo[skip ci]bar")).await;

    assert_eq!(status, StatusCode::CREATED);
    let event = &body["events"][0];
    assert!(event["skipMessage"].as_str().unwrap().contains("[skip ci]"));
    assert_eq!(event["username"], "batman");
}

#[tokio::test]
async fn ignored_committer_without_marker_is_no_content() {
    let (state, app) = setup("[webhooks]\nignore_commits_by = [\"batman\"]\n");

    let (status, _) = deliver(&app, "push", &push("batman", "update")).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.store.events().await.is_empty());
}

#[tokio::test]
async fn closed_pull_request_aborts_running_builds() {
    let (state, app) = setup("");
    let first = state.store.start_build(1, "PR-1:main", "a").await;
    let second = state.store.start_build(1, "PR-1:main", "b").await;

    let closed = pull_request("closed", 1, "acme/app");
    let (status, body) = deliver(&app, "pull_request", &closed).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["abortedBuilds"], 2);
    for id in [first.id, second.id] {
        let build = state.store.build(id).await.unwrap();
        assert_eq!(
            build.status_message.as_deref(),
            Some("Aborted because PR#1 was closed")
        );
    }
    assert!(state.store.events().await.is_empty());
}

#[tokio::test]
async fn redelivered_close_archives_once() {
    let (state, app) = setup("");
    state.store.start_build(1, "PR-1:main", "a").await;
    let closed = pull_request("closed", 1, "acme/app");

    let (first, body) = deliver(&app, "pull_request", &closed).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(body["archivedJobs"], 1);

    let (second, body) = deliver(&app, "pull_request", &closed).await;
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["archivedJobs"], 0);
    assert_eq!(body["abortedBuilds"], 0);

    let archives = state
        .store
        .operations()
        .await
        .into_iter()
        .filter(|op| matches!(op, StoreOp::JobArchived(_)))
        .count();
    assert_eq!(archives, 1);
    assert!(state.store.job_by_name(1, "PR-1:main").await.unwrap().archived);
}

#[tokio::test]
async fn synchronize_aborts_before_new_event() {
    let (state, app) = setup("");
    let old = state.store.start_build(1, "PR-1:main", "old").await;

    let (status, body) =
        deliver(&app, "pull_request", &pull_request("synchronize", 1, "acme/app")).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["events"][0]["startFrom"], "~pr");
    assert_eq!(body["events"][0]["causeMessage"], "Synchronized by github:alice");
    assert_eq!(
        state.store.build(old.id).await.unwrap().status_message.as_deref(),
        Some("Aborted because new commit was pushed to PR#1")
    );

    let ops = state.store.operations().await;
    let aborted = ops
        .iter()
        .position(|op| *op == StoreOp::BuildAborted(old.id))
        .unwrap();
    let created = ops
        .iter()
        .position(|op| matches!(op, StoreOp::EventCreated(_)))
        .unwrap();
    assert!(aborted < created);
}

#[tokio::test]
async fn push_without_config_branch_head_is_not_found() {
    let base = BASE.replace("name = \"master\"\nsha", "name = \"release\"\nsha");
    let (state, app) = setup_with("", &base);

    let (status, _) = deliver(&app, "push", &push("alice", "fix")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(state.store.events().await.is_empty());
}

#[tokio::test]
async fn pull_request_on_path_scoped_pipeline_creates_event() {
    let base = BASE.replacen(
        "branch = \"master\"\n",
        "branch = \"master\"\nroot_dir = \"api\"\n",
        1,
    );
    let (state, app) = setup_with("", &base);

    let opened = pull_request("opened", 4, "acme/app");
    let (status, body) = deliver(&app, "pull_request", &opened).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["events"][0]["startFrom"], "~pr");
    assert!(state.store.job_by_name(1, "PR-4:main").await.is_some());
}

#[tokio::test]
async fn fork_pull_request_on_fork_restricted_cluster_is_skipped() {
    let (_state, app) = setup("[webhooks]\nrestrict_pr = \"fork\"\n");

    let opened = pull_request("opened", 3, "mallory/app");
    let (status, body) = deliver(&app, "pull_request", &opened).await;

    assert_eq!(status, StatusCode::CREATED);
    let event = &body["events"][0];
    assert_eq!(event["type"], "pr");
    assert_eq!(event["prSource"], "fork");
    assert_eq!(event["chainPR"], false);
    assert_eq!(event["prNum"], 3);
    assert!(
        event["skipMessage"]
            .as_str()
            .unwrap()
            .contains("restrict fork and PR is fork")
    );
}

#[tokio::test]
async fn tag_delivery_resolves_sha() {
    let (_state, app) = setup("");
    let payload = json!({
        "ref": "v1.0.0",
        "ref_type": "tag",
        "repository": { "clone_url": REPO_URL, "default_branch": "master" },
        "sender": { "login": "alice" }
    });

    let (status, body) = deliver(&app, "create", &payload).await;

    assert_eq!(status, StatusCode::CREATED);
    let event = &body["events"][0];
    assert_eq!(event["startFrom"], "~tag");
    assert_eq!(event["sha"], "tag-sha");
    assert_eq!(event["meta"]["sd"]["tag"]["name"], "v1.0.0");
}

#[tokio::test]
async fn unknown_tag_is_no_content() {
    let (_state, app) = setup("");
    let payload = json!({
        "ref": "v9.9.9",
        "ref_type": "tag",
        "repository": { "clone_url": REPO_URL },
        "sender": { "login": "alice" }
    });

    let (status, _) = deliver(&app, "create", &payload).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unsupported_event_is_no_content() {
    let (_state, app) = setup("");
    let (status, _) = deliver(&app, "ping", &json!({ "zen": "hi" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unparseable_body_is_bad_request() {
    let (_state, app) = setup("");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks")
        .header("x-github-event", "push")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let (_state, app) = setup("[webhooks]\nsecret = \"topsecret\"\n");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks")
        .header("x-github-event", "push")
        .header("x-hub-signature-256", "sha256=00")
        .body(Body::from(push("alice", "fix").to_string()))
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let (_state, app) = setup("[webhooks]\nmax_bytes = 16\n");
    let (status, _) = deliver(&app, "push", &push("alice", "fix")).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn deliveries_are_rate_limited_per_repository() {
    let (_state, app) = setup("[rate_limit]\nmax_requests = 1\nwindow_secs = 60\n");

    let (first, _) = deliver(&app, "push", &push("alice", "one")).await;
    let (second, _) = deliver(&app, "push", &push("alice", "two")).await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn stats_count_deliveries() {
    let (_state, app) = setup("");
    deliver(&app, "push", &push("alice", "fix")).await;
    deliver(&app, "ping", &json!({})).await;

    let request = Request::builder()
        .uri("/api/stats")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deliveries"]["received"], 2);
    assert_eq!(body["deliveries"]["created"], 1);
    assert_eq!(body["deliveries"]["no_action"], 1);
    assert_eq!(body["store"]["events"], 1);
}
