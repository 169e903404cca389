use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use nicoproxy::{common::http::HttpClient, configs::Config, server::AppState, transport};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header as header_eq, method, path, query_param},
};

const SM9_WATCH: &str = include_str!("fixtures/sm9_watch.json");

fn state_for(server: &MockServer, mutate: impl FnOnce(&mut Config)) -> Arc<AppState> {
    let mut config = Config::default();
    config.niconico.watch_base_url = server.uri();
    config.niconico.api_base_url = server.uri();
    mutate(&mut config);

    let http = HttpClient::new(&config.niconico).unwrap();
    Arc::new(AppState::new(config, http))
}

fn app(state: &Arc<AppState>) -> Router {
    transport::router(state.clone())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn audio_only_watch(video_id: &str) -> Value {
    json!({
        "data": { "response": {
            "client": { "watchId": video_id, "watchTrackId": "track_audio" },
            "media": { "domand": {
                "videos": [],
                "audios": [{ "id": "audio-aac-128kbps", "isAvailable": true, "qualityLevel": 0 }],
                "accessRightKey": "audio-key"
            }},
            "owner": null,
            "channel": { "name": "channel" },
            "video": { "id": video_id, "title": "audio only", "duration": 12 }
        }}
    })
}

#[tokio::test]
async fn index_reports_ok_with_version_header() {
    let server = MockServer::start().await;
    let state = state_for(&server, |_| {});

    let resp = app(&state).oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("nicoproxy-version").unwrap(),
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(json_body(resp).await, json!({ "detail": "ok" }));
}

#[tokio::test]
async fn video_detail_is_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch/sm9"))
        .and(query_param("responseType", "json"))
        .and(header_eq("x-frontend-id", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SM9_WATCH, "application/json"))
        .mount(&server)
        .await;
    let state = state_for(&server, |_| {});

    let resp = app(&state).oneshot(get("/video/sm9")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json_body(resp).await,
        json!({
            "id": "sm9",
            "title": "新・豪血寺一族 -煩悩解放 - レッツゴー！陰陽師",
            "author": "中の",
            "durationMs": 320000,
            "thumbnailUrl": "https://img.cdn.nimg.jp/s/nicovideo/thumbnails/9/9.L/r1280x720l?key=fixture"
        })
    );
}

#[tokio::test]
async fn video_detail_upstream_failure_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch/sm0"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let state = state_for(&server, |_| {});

    let resp = app(&state).oneshot(get("/video/sm0")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(resp).await;
    assert_eq!(body["status"], 500);
    assert_eq!(body["path"], "/video/sm0");
}

#[tokio::test]
async fn stream_without_audio_is_404_and_never_negotiates() {
    let server = MockServer::start().await;
    let mut watch: Value = serde_json::from_str(SM9_WATCH).unwrap();
    for audio in watch["data"]["response"]["media"]["domand"]["audios"]
        .as_array_mut()
        .unwrap()
    {
        audio["isAvailable"] = json!(false);
    }

    Mock::given(method("GET"))
        .and(path("/watch/sm9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(watch))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;
    let state = state_for(&server, |c| c.transcoder.binary = "/nonexistent/ffmpeg".into());

    let resp = app(&state).oneshot(get("/video/sm9/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(state.streams.is_empty());
}

#[tokio::test]
async fn stream_with_null_grant_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch/sm9"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SM9_WATCH, "application/json"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/watch/sm9/access-rights/hls"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "data": null })))
        .mount(&server)
        .await;
    let state = state_for(&server, |_| {});

    let resp = app(&state).oneshot(get("/video/sm9/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(resp).await["message"], "content grant unavailable for sm9");
}

#[tokio::test]
async fn audio_only_media_streams_aac() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watch/so42"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "domand_bid=bid42; Path=/")
                .set_body_json(audio_only_watch("so42")),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/watch/so42/access-rights/hls"))
        .and(query_param("__retry", "0"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/watch/so42/access-rights/hls"))
        .and(header_eq("x-access-right-key", "audio-key"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("set-cookie", "nicosid=42.42; Path=/")
                .set_body_json(json!({ "data": { "contentUrl": "https://delivery.test/so42.m3u8" } })),
        )
        .mount(&server)
        .await;

    // `echo` stands in for ffmpeg: its stdout is the argument list.
    let state = state_for(&server, |c| c.transcoder.binary = "echo".into());

    let resp = app(&state).oneshot(get("/video/so42/stream")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/aac");

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(!body.is_empty());
    assert!(text.contains("cookie: domand_bid=bid42; nicosid=42.42"));
    assert!(text.contains("-i https://delivery.test/so42.m3u8"));
    assert!(text.contains("-f adts -"));

    for _ in 0..100 {
        if state.streams.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(state.streams.is_empty());
}

#[tokio::test]
async fn password_is_enforced_when_configured() {
    let server = MockServer::start().await;
    let state = state_for(&server, |c| c.server.password = Some("hunter2".into()));

    let resp = app(&state).oneshot(get("/stats")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(resp).await["message"], "Missing Authorization header");

    let req = Request::builder()
        .uri("/stats")
        .header(header::AUTHORIZATION, "hunter2")
        .body(Body::empty())
        .unwrap();
    let resp = app(&state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["activeStreams"], 0);
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn version_reports_package_version() {
    let server = MockServer::start().await;
    let state = state_for(&server, |_| {});

    let resp = app(&state).oneshot(get("/version")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["semver"], env!("CARGO_PKG_VERSION"));
    assert!(body["git"]["branch"].is_string());
}
