// End-to-end routing tests with fake credentials and mocked upstream APIs

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use homeboard::calendar::CalendarService;
use homeboard::config::{CalendarConfig, PhotosConfig};
use homeboard::credentials::{
    CredentialBinding, EncryptionKey, Provider, TokenCacheManager, TokenRecord, Vault,
};
use homeboard::error::Result;
use homeboard::oauth::ProviderAdapter;
use homeboard::photos::PhotoService;
use homeboard::server::{create_router, AppState};
use homeboard::services::{ApiDescriptor, ServiceClientFactory};
use mockito::Matcher;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

/// Hands out a fixed one-hour token for its provider.
struct FixedAdapter(Provider);

#[async_trait]
impl ProviderAdapter for FixedAdapter {
    fn provider(&self) -> Provider {
        self.0
    }

    async fn mint_token(&self, _scopes: &BTreeSet<String>) -> Result<TokenRecord> {
        TokenRecord::new(
            format!("fixed-{}", self.0.as_str()),
            None,
            Some(Utc::now() + Duration::hours(1)),
            Value::Null,
        )
    }

    fn is_fresh(&self, record: &TokenRecord) -> bool {
        !record.is_expired(60)
    }

    async fn refresh(&self, _record: &TokenRecord) -> Result<TokenRecord> {
        self.mint_token(&BTreeSet::new()).await
    }
}

fn app(upstream: &str, dir: &Path) -> Router {
    let vault = Vault::new(dir.join("vault"), EncryptionKey::from_bytes([9u8; 32])).unwrap();
    let google: Arc<dyn ProviderAdapter> = Arc::new(FixedAdapter(Provider::GoogleInteractive));
    let microsoft: Arc<dyn ProviderAdapter> =
        Arc::new(FixedAdapter(Provider::MicrosoftClientCredentials));
    let manager = TokenCacheManager::new(vault, vec![google, microsoft], 60);
    let factory = ServiceClientFactory::new(manager.clone()).unwrap();

    let calendar = CalendarService::new(
        factory.clone(),
        ApiDescriptor::new("calendar", "v3", upstream),
        CredentialBinding::new(Provider::GoogleInteractive, ["calendar.readonly"], "calendar_token")
            .unwrap(),
        CalendarConfig {
            cache_path: dir.join("calendar_cache.json").display().to_string(),
            ..CalendarConfig::default()
        },
    );
    let photos = PhotoService::new(
        factory,
        ApiDescriptor::new("graph", "v1.0", upstream),
        CredentialBinding::new(Provider::MicrosoftClientCredentials, [".default"], "onedrive_token")
            .unwrap(),
        PhotosConfig {
            folder: "DashboardPhotos".to_string(),
            drive_user: "frame".to_string(),
            cache_path: dir.join("image_cache.json").display().to_string(),
            ..PhotosConfig::default()
        },
    );

    create_router(AppState {
        manager,
        calendar: Arc::new(calendar),
        photos: Arc::new(photos),
    })
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_calendar_route_returns_events() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::UrlEncoded("singleEvents".into(), "true".into()))
        .match_header("authorization", "Bearer fixed-google")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items":[{"id":"e1","summary":"Piano lesson","start":{"dateTime":"2026-10-19T16:00:00Z"}}]}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&server.url(), dir.path()), "/api/calendar").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stale"], false);
    assert_eq!(body["events"][0]["summary"], "Piano lesson");
    assert!(dir.path().join("calendar_cache.json").exists());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_calendar_route_serves_stale_cache_on_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/calendars/primary/events")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(r#"{"error":{"code":403,"message":"Calendar usage limits exceeded."}}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("calendar_cache.json"),
        r#"{"events":[{"id":"old","summary":"Yesterday's plan","start":"2026-10-17","end":null}],"fetched_at":"2026-10-17T08:00:00Z"}"#,
    )
    .unwrap();

    let (status, body) = get(app(&server.url(), dir.path()), "/api/calendar").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stale"], true);
    assert_eq!(body["events"][0]["id"], "old");
}

#[tokio::test]
async fn test_next_photo_picks_an_image() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/users/frame/drive/root:/DashboardPhotos:/children")
        .match_header("authorization", "Bearer fixed-microsoft")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"value":[
                {"name":"beach.jpg","file":{"mimeType":"image/jpeg"},"@microsoft.graph.downloadUrl":"https://dl.example/beach"},
                {"name":"list.docx","file":{"mimeType":"application/msword"},"@microsoft.graph.downloadUrl":"https://dl.example/list"}
            ]}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = app(&server.url(), dir.path());

    let (status, body) = get(app.clone(), "/api/photos/next").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["image_url"], "https://dl.example/beach");

    // Served from the cached list.
    let (status, _) = get(app, "/api/photos/next").await;
    assert_eq!(status, StatusCode::OK);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_folder_is_not_found() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/users/frame/drive/root:/DashboardPhotos:/children")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"value":[]}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app(&server.url(), dir.path()), "/api/photos/next").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No images found");
}

#[tokio::test]
async fn test_health_reports_each_binding() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = get(app("http://127.0.0.1:9", dir.path()), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["calendar_credentials"]["status"], "idle");
    assert_eq!(
        body["checks"]["photos_credentials"]["token"]["binding"],
        "microsoft:onedrive_token"
    );
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let response = app("http://127.0.0.1:9", dir.path())
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}
