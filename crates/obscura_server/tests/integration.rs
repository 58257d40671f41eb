//! Integration tests for the control plane.
//!
//! Drives the axum router end to end: registration, heartbeat and
//! attestation, capability-based claims, result signing, NO_CHANGE
//! dedup, and offline sync.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use obscura_db::{create_pool, ensure_schema, DbConfig, NewJob};
use obscura_protocol::{canonical_json_of, Guid, ResultStatus, ToolKind};
use obscura_security::{MasterKey, ResultSigner};
use obscura_server::{build_app, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const CHECKSUM: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

struct Harness {
    app: Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

async fn setup() -> Harness {
    let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
    ensure_schema(&pool).await.unwrap();

    let dir = TempDir::new().unwrap();
    let master_key = MasterKey::load_or_generate(&dir.path().join("master.key")).unwrap();
    let state = Arc::new(AppState::new(
        pool,
        master_key,
        dir.path().join("releases"),
    ));
    state
        .releases
        .publish("v1.2.0", &[("darwin-arm64", "obscura-agent", CHECKSUM, 1024)])
        .await
        .unwrap();

    Harness {
        app: build_app(Arc::clone(&state)),
        state,
        _dir: dir,
    }
}

async fn call(
    app: &Router,
    method: &str,
    path: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(path);
    if let Some(key) = api_key {
        request = request.header("authorization", format!("Bearer {key}"));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Register an agent through the API. Returns (agent_guid, api_key).
async fn register_agent(harness: &Harness, team: Guid, caps: &[&str]) -> (Guid, String) {
    let token = harness
        .state
        .registry
        .create_registration_token(team, "admin", 24)
        .await
        .unwrap();

    let (status, body) = call(
        &harness.app,
        "POST",
        "/agents/register",
        None,
        Some(json!({
            "token": token,
            "name": "studio",
            "hostname": "studio.local",
            "platform": "darwin-arm64",
            "version": "v1.2.0",
            "binary_checksum": CHECKSUM,
            "capabilities": caps,
            "authorized_roots": ["/photos"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");

    let guid: Guid = body["agent_guid"].as_str().unwrap().parse().unwrap();
    let api_key = body["api_key"].as_str().unwrap().to_string();

    // A first heartbeat brings the agent online.
    let (status, _) = heartbeat(harness, guid, &api_key, CHECKSUM).await;
    assert_eq!(status, StatusCode::OK);
    (guid, api_key)
}

async fn heartbeat(
    harness: &Harness,
    guid: Guid,
    api_key: &str,
    checksum: &str,
) -> (StatusCode, Value) {
    call(
        &harness.app,
        "POST",
        &format!("/agents/{guid}/heartbeat"),
        Some(api_key),
        Some(json!({
            "capabilities": ["local_filesystem", "tool:photostats:v1.0"],
            "metrics": {},
            "version": "v1.2.0",
            "platform": "darwin-arm64",
            "binary_checksum": checksum,
        })),
    )
    .await
}

fn result_payload(status: &str) -> Value {
    json!({
        "status": status,
        "started_at": "2026-08-01T10:00:00Z",
        "completed_at": "2026-08-01T10:01:00Z",
        "duration_seconds": 60.0,
        "results": {"total_files": 2},
        "no_change_copy": status == "NO_CHANGE",
    })
}

fn sign(secret_b64: &str, payload: &Value) -> String {
    let canonical = canonical_json_of(payload).unwrap();
    ResultSigner::from_b64(secret_b64).unwrap().sign(&canonical)
}

#[tokio::test]
async fn test_claim_order_bound_and_capability() {
    let harness = setup().await;
    let team = Guid::new();
    let (agent_guid, api_key) = register_agent(
        &harness,
        team,
        &["local_filesystem", "tool:photostats:v1.0"],
    )
    .await;

    // J1 bound to the agent at priority 5; J2 unbound at priority 10
    // requiring a capability the agent has.
    let j1 = harness
        .state
        .queue
        .enqueue(
            NewJob::immediate(team, ToolKind::Photostats)
                .bound_to(agent_guid)
                .with_priority(5),
        )
        .await
        .unwrap();
    let j2 = harness
        .state
        .queue
        .enqueue(
            NewJob::immediate(team, ToolKind::Photostats)
                .requiring(vec!["tool:photostats:v1.0".into()])
                .with_priority(10),
        )
        .await
        .unwrap();

    let (status, body) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["guid"].as_str().unwrap(), j2.guid);
    assert!(!body["signing_secret_b64"].as_str().unwrap().is_empty());

    let (status, body) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["guid"].as_str().unwrap(), j1.guid);

    let (status, _) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_capability_mismatch_leaves_job_pending() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .queue
        .enqueue(
            NewJob::immediate(team, ToolKind::Photostats)
                .requiring(vec!["tool:photostats:v9.9".into()]),
        )
        .await
        .unwrap();

    let (status, _) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_signed_completion_accepted_and_replay_refused() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;
    let (_, intruder_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    let job_guid = claim["job"]["guid"].as_str().unwrap().to_string();
    let secret = claim["signing_secret_b64"].as_str().unwrap();

    let payload = result_payload("COMPLETED");
    let signature = sign(secret, &payload);

    let (status, body) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/complete"),
        Some(&api_key),
        Some(json!({"result": payload, "signature": signature})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "complete failed: {body}");
    assert!(body["result_guid"].as_str().is_some());

    // Replay by another agent: refused with 409, no state change.
    let (status, _) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/complete"),
        Some(&intruder_key),
        Some(json!({"result": payload, "signature": signature})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let job = harness
        .state
        .queue
        .get(job_guid.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, "completed");
}

#[tokio::test]
async fn test_invalid_signature_rewinds_job() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    let job_guid: Guid = claim["job"]["guid"].as_str().unwrap().parse().unwrap();

    let payload = result_payload("COMPLETED");
    let (status, _) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/complete"),
        Some(&api_key),
        Some(json!({"result": payload, "signature": "00".repeat(32)})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // No result was produced and the job rewound to pending with a
    // bumped retry count.
    let job = harness.state.queue.get(job_guid).await.unwrap().unwrap();
    assert_eq!(job.status, "pending");
    assert_eq!(job.retry_count, 1);
    assert!(job.signing_secret_hash.is_none());
}

#[tokio::test]
async fn test_input_state_no_change_flow() {
    let harness = setup().await;
    let team = Guid::new();
    let (agent_guid, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;
    let collection = harness
        .state
        .catalog
        .create_collection(
            team,
            "archive",
            obscura_protocol::CollectionType::Local,
            "/photos/a",
            Some(agent_guid),
            None,
        )
        .await
        .unwrap();
    let collection_guid: Guid = collection.guid.parse().unwrap();
    let hash = "ab".repeat(32);

    // First run: no prior result, the tool executes and stores its hash.
    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats).for_collection(collection_guid))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    let job_guid = claim["job"]["guid"].as_str().unwrap().to_string();
    let secret = claim["signing_secret_b64"].as_str().unwrap();

    let (_, verdict) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/input-state"),
        Some(&api_key),
        Some(json!({"input_state_hash": hash})),
    )
    .await;
    assert_eq!(verdict["no_change"], false);

    let mut payload = result_payload("COMPLETED");
    payload["input_state_hash"] = json!(hash);
    let signature = sign(secret, &payload);
    let (status, first) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/complete"),
        Some(&api_key),
        Some(json!({"result": payload, "signature": signature})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let reference = first["result_guid"].as_str().unwrap().to_string();

    // Second run, unchanged input: the precheck short-circuits and a
    // NO_CHANGE completion references the first result.
    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats).for_collection(collection_guid))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    let job_guid = claim["job"]["guid"].as_str().unwrap().to_string();
    let secret = claim["signing_secret_b64"].as_str().unwrap();

    let (_, verdict) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/input-state"),
        Some(&api_key),
        Some(json!({"input_state_hash": hash})),
    )
    .await;
    assert_eq!(verdict["no_change"], true);
    assert_eq!(verdict["reference_result_guid"].as_str().unwrap(), reference);

    let mut payload = result_payload("NO_CHANGE");
    payload["download_report_from"] = json!(reference);
    payload["input_state_hash"] = json!(hash);
    let signature = sign(secret, &payload);
    let (status, copy) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/complete"),
        Some(&api_key),
        Some(json!({"result": payload, "signature": signature})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "copy refused: {copy}");

    let copy_guid: Guid = copy["result_guid"].as_str().unwrap().parse().unwrap();
    let row = harness.state.results.get(copy_guid).await.unwrap().unwrap();
    assert!(row.no_change_copy);
    assert_eq!(row.status().unwrap(), ResultStatus::NoChange);
    assert_eq!(row.download_report_from.as_deref(), Some(reference.as_str()));
}

#[tokio::test]
async fn test_deactivated_release_blocks_claim() {
    let harness = setup().await;
    let team = Guid::new();
    let (guid, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness.state.releases.deactivate("v1.2.0").await.unwrap();
    let (status, body) = heartbeat(&harness, guid, &api_key, CHECKSUM).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_outdated"], false);

    // Heartbeat is allowed, claiming is not.
    let (status, _) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_revoked_agent_gets_coded_403() {
    let harness = setup().await;
    let team = Guid::new();
    let (guid, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness.state.registry.revoke(guid, "compromised host").await.unwrap();

    let (status, body) = heartbeat(&harness, guid, &api_key, CHECKSUM).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"].as_str(), Some("agent_revoked"));
}

#[tokio::test]
async fn test_pending_commands_drained_once() {
    let harness = setup().await;
    let team = Guid::new();
    let (guid, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    let cancel = format!("cancel_job:{}", Guid::new());
    let (status, _) = call(
        &harness.app,
        "PUT",
        &format!("/agents/{guid}/pending_commands"),
        Some(&api_key),
        Some(json!({"commands": [cancel]})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = heartbeat(&harness, guid, &api_key, CHECKSUM).await;
    assert_eq!(body["pending_commands"].as_array().unwrap().len(), 1);

    let (_, body) = heartbeat(&harness, guid, &api_key, CHECKSUM).await;
    assert!(body["pending_commands"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_progress_ownership() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, owner_key) = register_agent(&harness, team, &["local_filesystem"]).await;
    let (_, other_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&owner_key), Some(json!({}))).await;
    let job_guid = claim["job"]["guid"].as_str().unwrap().to_string();

    let (status, _) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/progress"),
        Some(&owner_key),
        Some(json!({"stage": "scanning", "percentage": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{job_guid}/progress"),
        Some(&other_key),
        Some(json!({"stage": "scanning"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &harness.app,
        "POST",
        &format!("/jobs/{}/progress", Guid::new()),
        Some(&owner_key),
        Some(json!({"stage": "scanning"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offline_upload_idempotent() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    let result_id = Guid::new();
    let body = json!({
        "result": {
            "result_id": result_id,
            "tool": "photostats",
            "executed_at": "2026-08-01T09:00:00Z",
            "result": result_payload("COMPLETED"),
        }
    });

    let (status, first) = call(&harness.app, "POST", "/results/upload", Some(&api_key), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["result_guid"].as_str().unwrap(), result_id.to_string());

    // Retrying the same sync is a no-op returning the same result.
    let (status, second) = call(&harness.app, "POST", "/results/upload", Some(&api_key), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["result_guid"], first["result_guid"]);
}

#[tokio::test]
async fn test_chunked_completion_round_trip() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .queue
        .enqueue(NewJob::immediate(team, ToolKind::Photostats))
        .await
        .unwrap();
    let (_, claim) = call(&harness.app, "POST", "/jobs/claim", Some(&api_key), Some(json!({}))).await;
    let job_guid = claim["job"]["guid"].as_str().unwrap().to_string();
    let secret = claim["signing_secret_b64"].as_str().unwrap();

    let mut payload = result_payload("COMPLETED");
    payload["report_html"] = json!("<html>big report</html>");
    let signature = sign(secret, &payload);
    let body = serde_json::to_vec(&json!({"result": payload, "signature": signature})).unwrap();

    let (_, start) = call(
        &harness.app,
        "POST",
        "/chunks/start",
        Some(&api_key),
        Some(json!({"job_guid": job_guid, "total_size": body.len()})),
    )
    .await;
    let upload_guid = start["upload_guid"].as_str().unwrap().to_string();

    for (index, chunk) in body.chunks(64).enumerate() {
        let (status, _) = call(
            &harness.app,
            "POST",
            "/chunks/append",
            Some(&api_key),
            Some(json!({
                "upload_guid": upload_guid,
                "index": index,
                "data_b64": BASE64.encode(chunk),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, commit) = call(
        &harness.app,
        "POST",
        "/chunks/commit",
        Some(&api_key),
        Some(json!({"upload_guid": upload_guid})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "commit failed: {commit}");

    let result_guid: Guid = commit["result_guid"].as_str().unwrap().parse().unwrap();
    let row = harness.state.results.get(result_guid).await.unwrap().unwrap();
    assert_eq!(row.report_html.as_deref(), Some("<html>big report</html>"));
}

#[tokio::test]
async fn test_agent_collections_listing() {
    let harness = setup().await;
    let team = Guid::new();
    let (agent_guid, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    harness
        .state
        .catalog
        .create_collection(
            team,
            "archive",
            obscura_protocol::CollectionType::Local,
            "/photos/archive",
            Some(agent_guid),
            None,
        )
        .await
        .unwrap();

    let (status, body) = call(
        &harness.app,
        "GET",
        &format!("/agents/{agent_guid}/collections"),
        Some(&api_key),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let collections = body["collections"].as_array().unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0]["name"], "archive");
    assert_eq!(collections[0]["collection_type"], "local");
}

#[tokio::test]
async fn test_cameras_discover_limit() {
    let harness = setup().await;
    let team = Guid::new();
    let (_, api_key) = register_agent(&harness, team, &["local_filesystem"]).await;

    let ids: Vec<String> = (0..51).map(|i| format!("cam-{i}")).collect();
    let (status, _) = call(
        &harness.app,
        "POST",
        "/cameras/discover",
        Some(&api_key),
        Some(json!({"camera_ids": ids})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = call(
        &harness.app,
        "POST",
        "/cameras/discover",
        Some(&api_key),
        Some(json!({"camera_ids": ["cam-1"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cameras"][0]["status"], "temporary");
}
