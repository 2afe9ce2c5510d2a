use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use yt2mp3_core::{
    ClientError, ControllerConfig, ConversionError, ConversionOutcome, DownloadItem, FormatKey,
    HistoryStore, HttpTaskClient, LocalStore, MediaKind, PollingController, TaskService,
    TaskStatus,
};

const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    path: String,
    body: Value,
}

/// Minimal HTTP/1.1 backend answering every request through `respond`.
struct StubBackend {
    origin: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubBackend {
    async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, Vec<u8>) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);
        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let respond = respond.clone();
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    serve(socket, &*respond, &recorded).await;
                });
            }
        });
        Self {
            origin: format!("http://{addr}"),
            requests,
        }
    }

    fn base_url(&self) -> String {
        format!("{}/api", self.origin)
    }

    fn client(&self) -> HttpTaskClient {
        HttpTaskClient::new(Client::new(), &self.base_url()).unwrap()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn hits(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }
}

async fn serve<F>(mut socket: TcpStream, respond: &F, recorded: &Mutex<Vec<Recorded>>)
where
    F: Fn(&str, &str) -> (u16, Vec<u8>),
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();
    let length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = serde_json::from_slice(&buf[header_end..]).unwrap_or(Value::Null);
    recorded.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        body,
    });

    let (status, payload) = respond(&method, &path);
    let head = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&payload).await;
    let _ = socket.shutdown().await;
}

fn reply(status: u16, body: Value) -> (u16, Vec<u8>) {
    (status, body.to_string().into_bytes())
}

#[tokio::test]
async fn start_task_posts_url_and_formats() {
    let backend = StubBackend::start(|method, path| match (method, path) {
        ("POST", "/api/convert") => reply(200, json!({ "success": true, "task_id": "abc" })),
        _ => reply(404, json!({ "error": "no route" })),
    })
    .await;

    let task_id = backend
        .client()
        .start_task(URL, &[FormatKey::Audio320, FormatKey::Video720])
        .await
        .unwrap();
    assert_eq!(task_id, "abc");

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/api/convert");
    assert_eq!(
        requests[0].body,
        json!({ "url": URL, "formats": ["mp3_320", "mp4_720"] })
    );
}

#[tokio::test]
async fn status_is_read_from_the_task_path() {
    let backend = StubBackend::start(|method, path| match (method, path) {
        ("GET", "/api/status/abc") => reply(200, json!({ "status": "processing", "progress": 45 })),
        _ => reply(404, json!({})),
    })
    .await;

    let snapshot = backend.client().get_status("abc").await.unwrap();
    assert_eq!(snapshot.status, TaskStatus::Running);
    assert_eq!(snapshot.progress, 45);
    assert_eq!(backend.requests()[0].method, "GET");
}

#[tokio::test]
async fn non_success_statuses_become_service_errors() {
    let backend = StubBackend::start(|_, path| match path {
        "/api/video-info" => reply(500, json!({ "error": "extractor failed" })),
        _ => (404, b"<html>gone</html>".to_vec()),
    })
    .await;
    let client = backend.client();

    let err = client.fetch_metadata(URL).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Service { status: Some(500), ref message } if message == "extractor failed"
    ));
    assert_eq!(backend.requests()[0].body, json!({ "url": URL }));

    let err = client.get_status("missing").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Service { status: Some(404), ref message } if message == "Not Found"
    ));
}

#[tokio::test]
async fn rejected_status_envelope_is_a_service_error() {
    let backend = StubBackend::start(|_, _| {
        reply(200, json!({ "success": false, "error": "Task expired" }))
    })
    .await;

    let err = backend.client().get_status("abc").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Service { status: None, ref message } if message == "Task expired"
    ));
}

/// Runs one conversion against a backend whose status endpoint always answers `status_reply`.
async fn convert_against(status_reply: (u16, Value)) -> (ConversionOutcome, StubBackend) {
    let backend = StubBackend::start(move |_, path| {
        if path == "/api/video-info" {
            reply(
                200,
                json!({ "success": true, "data": { "id": "dQw4w9WgXcQ", "title": "Song" } }),
            )
        } else if path == "/api/convert" {
            reply(200, json!({ "success": true, "task_id": "abc" }))
        } else {
            reply(status_reply.0, status_reply.1.clone())
        }
    })
    .await;
    let dir = TempDir::new().unwrap();
    let history = HistoryStore::load(LocalStore::open(dir.path()).unwrap(), 50);
    let controller = PollingController::new(
        Arc::new(backend.client()) as Arc<dyn TaskService>,
        history,
        ControllerConfig {
            poll_interval: Duration::from_millis(20),
            ..ControllerConfig::default()
        },
    );

    let outcome = controller.start(URL).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(controller.history().is_empty());
    (outcome, backend)
}

#[tokio::test]
async fn rejected_status_fails_the_session_without_further_polls() {
    let (outcome, backend) =
        convert_against((200, json!({ "success": false, "error": "backend exploded" }))).await;
    assert!(matches!(
        outcome,
        ConversionOutcome::Failed(ConversionError::Client(ClientError::Service { ref message, .. }))
            if message == "backend exploded"
    ));
    assert_eq!(backend.hits("/api/status/abc"), 1);
}

#[tokio::test]
async fn error_only_status_fails_the_session_without_further_polls() {
    let (outcome, backend) = convert_against((200, json!({ "error": "Task not found" }))).await;
    assert!(matches!(
        outcome,
        ConversionOutcome::Failed(ConversionError::Task(ref message)) if message == "Task not found"
    ));
    assert_eq!(backend.hits("/api/status/abc"), 1);
}

#[tokio::test]
async fn server_error_while_polling_fails_the_session() {
    let (outcome, backend) = convert_against((500, json!({ "error": "worker crashed" }))).await;
    assert!(matches!(
        outcome,
        ConversionOutcome::Failed(ConversionError::Client(ClientError::Service {
            status: Some(500),
            ..
        }))
    ));
    assert_eq!(backend.hits("/api/status/abc"), 1);
}

fn item(url: String) -> DownloadItem {
    DownloadItem {
        format: "mp3_320".to_string(),
        kind: MediaKind::Audio,
        label: "MP3 320kbps".to_string(),
        filename: "My Song - 320kbps.mp3".to_string(),
        size_bytes: 100_000,
        human_size: "97.66 KB".to_string(),
        url,
    }
}

#[tokio::test]
async fn download_streams_into_the_target_directory() {
    let backend = StubBackend::start(|_, path| match path {
        "/api/download/abc/mp3_320" => (200, vec![7u8; 100_000]),
        _ => reply(404, json!({})),
    })
    .await;
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");

    let url = format!("{}/api/download/abc/mp3_320", backend.origin);
    let path = backend.client().download(&item(url), &out).await.unwrap();

    assert_eq!(path, out.join("My Song - 320kbps.mp3"));
    assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![7u8; 100_000]);
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
}

#[tokio::test]
async fn failed_download_leaves_nothing_behind() {
    let backend = StubBackend::start(|_, _| reply(404, json!({ "error": "gone" }))).await;
    let dir = TempDir::new().unwrap();

    let url = format!("{}/api/download/abc/mp3_320", backend.origin);
    let err = backend
        .client()
        .download(&item(url), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
