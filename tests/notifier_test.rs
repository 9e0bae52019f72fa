//! Discord notifier against a mock webhook.

use ondl_rs::config::DiscordConfig;
use ondl_rs::error::Error;
use ondl_rs::tools::{Discord, Notification, Notifier, NotifyStatus};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn discord_for(server: &MockServer) -> Discord {
    let config = DiscordConfig {
        webhook_url: Some(SecretString::from(format!("{}/api/webhooks/1/token", server.uri()))),
        username: "OnDL".to_string(),
        ..DiscordConfig::default()
    };
    Discord::from_config(&config).unwrap()
}

fn message(used_fallback: bool) -> Notification {
    Notification {
        title: "Sample Clip".to_string(),
        url: "https://youtu.be/abc123".to_string(),
        channel: "Some Channel".to_string(),
        duration: Some(200.0),
        file_size_bytes: Some(5 * 1024 * 1024),
        saved_to: PathBuf::from("/media/music/Some Channel"),
        preview_start: Some(20.0),
        used_fallback,
        thumbnail: None,
    }
}

#[tokio::test]
async fn posts_multipart_payload_with_preview() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/token"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let preview = tmp.path().join("Sample Clip.gif");
    std::fs::write(&preview, b"GIF89a-preview-bytes").unwrap();

    let status = discord_for(&server)
        .notify(&message(true), Some(preview.as_path()))
        .await
        .unwrap();
    assert_eq!(status, NotifyStatus::Sent);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let content_type = request
        .headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(content_type.starts_with("multipart/form-data"));

    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("name=\"payload_json\""));
    assert!(body.contains("name=\"files[0]\""));
    assert!(body.contains("GIF89a-preview-bytes"));
    assert!(body.contains("attachment://Sample Clip.gif"));
    assert!(body.contains("Storage Fallback Used"));
    assert!(body.contains("\"username\":\"OnDL\""));
}

#[tokio::test]
async fn missing_attachment_is_sent_without_files() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let status = discord_for(&server)
        .notify(&message(false), Some(Path::new("/nonexistent/preview.gif")))
        .await
        .unwrap();
    assert_eq!(status, NotifyStatus::Sent);

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("payload_json"));
    assert!(!body.contains("files[0]"));
    assert!(!body.contains("attachment://"));
}

#[tokio::test]
async fn http_errors_are_reported_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"message":"Invalid Form Body"}"#))
        .mount(&server)
        .await;

    let result = discord_for(&server).notify(&message(false), None).await;
    match result {
        Err(Error::Notify(msg)) => {
            assert!(msg.contains("400"));
            assert!(msg.contains("Invalid Form Body"));
        }
        other => panic!("expected Notify error, got {other:?}"),
    }
}
