use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use guildstats_sync::{FetchPipeline, SyncConfig};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn profile_handler(Json(body): Json<Value>) -> Response {
    let target_id = body.get("targetId").and_then(Value::as_u64).unwrap_or(0);
    match target_id {
        1 => {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Json(json!({
                "id": 1,
                "name": "Ann",
                "level": 3,
                "guildTag": "<span style='color:#f0f'>PixelCons</span>",
                "colors": "16777215",
                "experience": 1200,
                "discordUser": "ann#1"
            }))
            .into_response()
        }
        2 => Json(json!({"id": 2, "name": "Bob", "level": 9, "guildTag": "OTHERGUILD"})).into_response(),
        3 => Json(json!({"id": 3, "name": "Dot", "level": "12", "guildTag": "PIXELCONS", "colors": "255"}))
            .into_response(),
        4 => StatusCode::NOT_FOUND.into_response(),
        5 => Json(json!({"id": 5, "name": "Cat", "guildTag": null})).into_response(),
        6 => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({"id": 6, "name": "Slow", "guildTag": "PIXELCONS"})).into_response()
        }
        7 => Json(json!({"id": 7, "name": "Cy", "level": 40, "guildTag": "[pixelcons]", "colors": "255,65280"}))
            .into_response(),
        8 => (StatusCode::OK, "<html>not json</html>").into_response(),
        9 => Json(json!({})).into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn spawn_fake_api() -> String {
    let app = Router::new().route("/GetUserProfile", post(profile_handler));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/GetUserProfile")
}

fn test_config(api_url: String, output_path: PathBuf) -> SyncConfig {
    SyncConfig {
        api_url,
        total_users: 9,
        batch_size: 3,
        pause: Duration::from_millis(100),
        http_timeout_secs: 1,
        output_path,
        ..SyncConfig::default()
    }
}

#[tokio::test]
async fn fetch_run_filters_compacts_and_tolerates_failures() {
    let api_url = spawn_fake_api().await;
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("userdata.json");
    std::fs::write(&output, r#"[{"i":999,"n":"stale","l":1,"c":""}]"#).expect("seed old output");

    let pipeline = FetchPipeline::new(test_config(api_url, output.clone())).expect("pipeline");
    let summary = pipeline.run_once().await.expect("run");

    // 4 (404), 6 (timeout), 8 (not json) and 9 (empty body) are unavailable
    assert_eq!(summary.requested, 9);
    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.members, 3);
    assert_eq!(
        std::fs::read_to_string(&output).expect("read output"),
        concat!(
            r#"[{"i":1,"n":"Ann","l":3,"c":"16777215"},"#,
            r#"{"i":3,"n":"Dot","l":"12","c":"255"},"#,
            r#"{"i":7,"n":"Cy","l":40,"c":"255,65280"}]"#
        )
    );

    // three batches, so two pauses
    let elapsed = summary.finished_at - summary.started_at;
    assert!(elapsed.num_milliseconds() >= 200);
}

#[tokio::test]
async fn batch_results_keep_submission_order() {
    let api_url = spawn_fake_api().await;
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("userdata.json");
    let mut config = test_config(api_url, output.clone());
    config.total_users = 3;
    config.pause = Duration::ZERO;

    // id 1 answers after id 3 within the same batch
    let summary = FetchPipeline::new(config)
        .expect("pipeline")
        .run_once()
        .await
        .expect("run");

    assert_eq!(summary.members, 2);
    let written: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(&output).expect("read output")).expect("json");
    let ids: Vec<_> = written.iter().map(|u| u["i"].as_u64().expect("id")).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn fetch_run_without_any_profile_writes_empty_array() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("userdata.json");
    let mut config = test_config("http://127.0.0.1:9/GetUserProfile".to_string(), output.clone());
    config.pause = Duration::ZERO;

    let summary = FetchPipeline::new(config)
        .expect("pipeline")
        .run_once()
        .await
        .expect("run");

    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.members, 0);
    assert_eq!(std::fs::read_to_string(&output).expect("read output"), "[]");
}
