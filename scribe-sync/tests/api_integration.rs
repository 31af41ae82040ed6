//! HTTP collaborator endpoints against a canned local HTTP responder.

mod common;

use common::MockAuthority;
use scribe_sync::api::{DocumentApi, Permission};
use scribe_sync::config::ClientConfig;
use scribe_sync::error::{ApiError, SyncError};
use scribe_sync::session::Session;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Serve the given responses in order, one per connection. Every request
/// received is forwarded as raw text.
async fn serve_http(responses: Vec<(u16, String)>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let request = read_request(&mut stream).await;
            let _ = tx.send(request);
            let reason = if status < 400 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://127.0.0.1:{port}/api"), rx)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn next_request(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for request")
        .expect("responder stopped")
}

#[tokio::test]
async fn test_list_documents_sends_bearer_credential() {
    let body = r#"[{"id":1,"title":"Plan","updated_at":"2024-05-01","version":3},{"id":2,"title":"Notes"}]"#;
    let (base, mut requests) = serve_http(vec![(200, body.to_string())]).await;
    let api = DocumentApi::new(&base).unwrap();

    let documents = api.list_documents("cred-1").await.unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0].id.as_str(), "1");
    assert_eq!(documents[0].version, Some(3));
    assert_eq!(documents[1].updated_at, None);

    let request = next_request(&mut requests).await;
    assert!(request.starts_with("GET /api/documents HTTP/1.1"), "{request}");
    assert!(request.to_lowercase().contains("authorization: bearer cred-1"));
}

#[tokio::test]
async fn test_list_documents_error_status() {
    let (base, _requests) = serve_http(vec![(401, r#"{"detail":"nope"}"#.to_string())]).await;
    let api = DocumentApi::new(&base).unwrap();

    let err = api.list_documents("bad").await.unwrap_err();
    assert!(matches!(err, ApiError::Status(401)), "got {err:?}");
}

#[tokio::test]
async fn test_issue_share_token() {
    let (base, mut requests) =
        serve_http(vec![(200, r#"{"access_token":"shared-xyz"}"#.to_string())]).await;
    let api = DocumentApi::new(&base).unwrap();

    let token = api
        .issue_share_token("cred", &"42".into(), &[Permission::Read, Permission::Write])
        .await
        .unwrap();
    assert_eq!(token, "shared-xyz");

    let request = next_request(&mut requests).await;
    assert!(request.starts_with("POST /api/documents/42/share HTTP/1.1"), "{request}");
    assert!(request.ends_with(r#"{"permissions":["read","write"]}"#), "{request}");
}

#[tokio::test]
async fn test_owner_session_from_listing_then_share() {
    let mut authority = MockAuthority::start().await;
    let listing = r#"[{"id":"7","title":"Roadmap","collaborators":[{"id":1,"name":"Ana"}]}]"#;
    let (base, mut requests) = serve_http(vec![
        (200, listing.to_string()),
        (200, r#"{"access_token":"guest-link"}"#.to_string()),
    ])
    .await;
    let session = Session::new(ClientConfig::for_testing(authority.ws_url(), base)).unwrap();

    let bound = session.start_owner("owner-cred").await.unwrap();
    assert_eq!(bound, Some("7".into()));
    assert_eq!(authority.expect_connected().await, "/ws/document/7/?token=owner-cred");

    let doc = session.store().current().unwrap();
    assert_eq!(doc.title, "Roadmap");
    assert_eq!(doc.collaborators[0].name, "Ana");
    assert_eq!(doc.last_update, "Just now");

    let token = session.share(&[Permission::Read]).await.unwrap();
    assert_eq!(token, "guest-link");
    next_request(&mut requests).await;
    let share = next_request(&mut requests).await;
    assert!(share.starts_with("POST /api/documents/7/share"), "{share}");

    session.end();
}

#[tokio::test]
async fn test_owner_session_listing_failure() {
    let authority = MockAuthority::start().await;
    let (base, _requests) = serve_http(vec![(500, "{}".to_string())]).await;
    let session = Session::new(ClientConfig::for_testing(authority.ws_url(), base)).unwrap();

    let err = session.start_owner("cred").await.unwrap_err();
    assert!(matches!(err, SyncError::Api(ApiError::Status(500))), "got {err:?}");
    assert!(session.role().is_none());
    assert_eq!(authority.accepted(), 0);
}
