use anyhow::Result;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ppe_monitor::{
    DetectionClient, HttpClientConfig, HttpDetectionClient, ImagePayload, MonitorError,
    StaticCredential,
};

/// What the fake service saw.
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One-shot HTTP service answering a single request with a canned response.
struct FakeService {
    addr: String,
    worker: Option<JoinHandle<()>>,
    requests: mpsc::Receiver<CapturedRequest>,
}

impl FakeService {
    fn respond(status: &str, body: &str) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = format!("http://{}", listener.local_addr()?);
        let (tx, requests) = mpsc::channel();
        let status = status.to_string();
        let body = body.to_string();
        let worker = std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                if let Ok(request) = handle(stream, &status, &body) {
                    let _ = tx.send(request);
                }
            }
        });
        Ok(Self {
            addr,
            worker: Some(worker),
            requests,
        })
    }

    fn client(&self, token: &str) -> Result<HttpDetectionClient> {
        let client = HttpDetectionClient::new(
            HttpClientConfig {
                base_url: self.addr.clone(),
                timeout: Duration::from_secs(5),
                ..HttpClientConfig::default()
            },
            Arc::new(StaticCredential::new(token)),
        )?;
        Ok(client)
    }

    fn request(mut self) -> Result<CapturedRequest> {
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| anyhow::anyhow!("fake service panicked"))?;
        }
        Ok(self.requests.recv_timeout(Duration::from_secs(5))?)
    }
}

fn handle(stream: TcpStream, status: &str, body: &str) -> Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    let length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let mut request_body = vec![0u8; length];
    reader.read_exact(&mut request_body)?;

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = stream;
    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(CapturedRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: request_body,
    })
}

fn frame() -> ImagePayload {
    ImagePayload::new(
        vec![0xFF, 0xD8, 0xFF, 0xE0, 0x10, 0x20, 0x30],
        "image/jpeg",
        "webcam_frame.jpg",
    )
}

#[test]
fn posts_multipart_with_bearer_and_normalizes_findings() -> Result<()> {
    let service = FakeService::respond(
        "200 OK",
        r#"{"success":true,"violations":[{"label":"NoHelmet","confidence":"0.87","bbox":[10,20,110,220]}],"annotated_image_base64":"aGVsbG8="}"#,
    )?;
    let client = service.client("secret-token")?;

    let normalized = client.detect_once(&frame())?;
    assert_eq!(normalized.findings.len(), 1);
    assert_eq!(normalized.findings[0].label(), "NoHelmet");
    assert!((normalized.findings[0].confidence() - 0.87).abs() < 1e-6);
    assert!(normalized.findings[0].bounding_box().is_some());
    assert_eq!(normalized.annotated_image.as_deref(), Some("aGVsbG8="));

    let request = service.request()?;
    assert!(request.request_line.starts_with("POST /detect/ "));
    assert_eq!(request.header("authorization"), Some("Bearer secret-token"));
    let content_type = request.header("content-type").unwrap_or_default();
    assert!(content_type.starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("name=\"file\"; filename=\"webcam_frame.jpg\""));
    assert!(body.contains("Content-Type: image/jpeg"));
    assert!(request
        .body
        .windows(4)
        .any(|w| w == [0xFF, 0xD8, 0xFF, 0xE0]));
    Ok(())
}

#[test]
fn unauthorized_maps_to_auth() -> Result<()> {
    let service = FakeService::respond("401 Unauthorized", r#"{"detail":"token expired"}"#)?;
    let client = service.client("stale")?;
    match client.detect_once(&frame()) {
        Err(MonitorError::Auth(detail)) => assert!(detail.contains("token expired")),
        other => panic!("expected Auth, got {:?}", other.map(|n| n.findings.len())),
    }
    Ok(())
}

#[test]
fn server_error_maps_to_network() -> Result<()> {
    let service = FakeService::respond("500 Internal Server Error", r#"{"detail":"boom"}"#)?;
    let client = service.client("tok")?;
    match client.detect_once(&frame()) {
        Err(MonitorError::Network(detail)) => assert!(detail.contains("500")),
        other => panic!("expected Network, got {:?}", other.map(|n| n.findings.len())),
    }
    Ok(())
}

#[test]
fn success_false_maps_to_service() -> Result<()> {
    let service = FakeService::respond(
        "200 OK",
        r#"{"success":false,"message":"model not loaded","violations":[]}"#,
    )?;
    let client = service.client("tok")?;
    match client.detect_once(&frame()) {
        Err(MonitorError::Service(detail)) => assert_eq!(detail, "model not loaded"),
        other => panic!("expected Service, got {:?}", other.map(|n| n.findings.len())),
    }
    Ok(())
}

#[test]
fn non_json_body_is_malformed() -> Result<()> {
    let service = FakeService::respond("200 OK", "<html>gateway</html>")?;
    let client = service.client("tok")?;
    assert!(matches!(
        client.detect_once(&frame()),
        Err(MonitorError::MalformedResponse(_))
    ));
    Ok(())
}

#[test]
fn empty_violation_list_is_a_valid_result() -> Result<()> {
    let service = FakeService::respond("200 OK", r#"{"violations":[]}"#)?;
    let client = service.client("tok")?;
    let normalized = client.detect_once(&frame())?;
    assert!(normalized.findings.is_empty());
    Ok(())
}

#[test]
fn upload_progress_is_monotonic_and_ends_at_one_hundred() -> Result<()> {
    let service = FakeService::respond("200 OK", r#"{"success":true,"violations":[]}"#)?;
    let client = service.client("tok")?;
    let mut seen = Vec::new();
    client.detect_with_progress(&frame(), &mut |pct: f32| seen.push(pct))?;
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(100.0));
    assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
    Ok(())
}

#[test]
fn missing_token_never_opens_a_connection() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let client = HttpDetectionClient::new(
        HttpClientConfig {
            base_url: format!("http://{}", listener.local_addr()?),
            ..HttpClientConfig::default()
        },
        Arc::new(StaticCredential::anonymous()),
    )?;
    assert!(matches!(
        client.detect_once(&frame()),
        Err(MonitorError::Auth(_))
    ));
    listener.set_nonblocking(true)?;
    match listener.accept() {
        Err(err) => assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock),
        Ok(_) => panic!("client connected without a credential"),
    }
    Ok(())
}

#[test]
fn unreachable_service_is_a_network_error() -> Result<()> {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()?
    };
    let client = HttpDetectionClient::new(
        HttpClientConfig {
            base_url: format!("http://{}", addr),
            connect_timeout: Duration::from_secs(2),
            ..HttpClientConfig::default()
        },
        Arc::new(StaticCredential::new("tok")),
    )?;
    assert!(matches!(
        client.detect_once(&frame()),
        Err(MonitorError::Network(_))
    ));
    Ok(())
}

#[test]
fn hung_service_times_out_as_network_error() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    // Accept and hold the connection without ever answering.
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));
            let _ = stream.read_to_end(&mut Vec::new());
        }
    });

    let client = HttpDetectionClient::new(
        HttpClientConfig {
            base_url: format!("http://{}", addr),
            timeout: Duration::from_secs(1),
            ..HttpClientConfig::default()
        },
        Arc::new(StaticCredential::new("tok")),
    )?;

    let started = Instant::now();
    let result = client.detect_once(&frame());
    let elapsed = started.elapsed();
    assert!(
        matches!(result, Err(MonitorError::Network(_))),
        "expected Network, got {:?}",
        result.map(|n| n.findings.len())
    );
    assert!(elapsed >= Duration::from_millis(900), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    Ok(())
}
