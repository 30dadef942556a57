//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use pogosig_lib::error::SigError;
#[allow(unused_imports)]
pub use pogosig_lib::message::{Message, RequestPayload};

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Routes library logs to the test harness; `RUST_LOG=debug` to see them
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the fake server does with one connection
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with a status, extra headers and a body
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: String,
    },
    /// Read the request, then close the socket without answering
    Drop,
    /// Read the request and keep the socket open without answering
    Stall(Duration),
}

#[allow(dead_code)]
impl Reply {
    pub fn ok(body: impl Into<String>) -> Self {
        Reply::Respond {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Respond {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_headers(self, extra: Vec<(&'static str, &'static str)>) -> Self {
        match self {
            Reply::Respond { status, body, .. } => Reply::Respond {
                status,
                headers: extra,
                body,
            },
            other => other,
        }
    }
}

/// A request as seen by the fake server
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Recorded {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[allow(dead_code)]
impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serves `replies` in order, one connection each, on an ephemeral port.
/// Returns the base URL and a handle yielding the recorded requests.
#[allow(dead_code)]
pub async fn serve(replies: Vec<Reply>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");

    let handle = tokio::spawn(async move {
        let mut recorded = Vec::new();
        for reply in replies {
            let (mut socket, _) = listener.accept().await.expect("accept");
            recorded.push(read_request(&mut socket).await);
            match reply {
                Reply::Respond { status, headers, body } => {
                    let mut response = format!(
                        "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                        status,
                        body.len()
                    );
                    for (name, value) in headers {
                        response.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    response.push_str("\r\n");
                    response.push_str(&body);
                    socket.write_all(response.as_bytes()).await.expect("write response");
                    let _ = socket.shutdown().await;
                }
                Reply::Drop => drop(socket),
                Reply::Stall(duration) => {
                    tokio::time::sleep(duration).await;
                    drop(socket);
                }
            }
        }
        recorded
    });

    (format!("http://{}", addr), handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Recorded {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.expect("read request");
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.expect("read body");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Recorded {
        request_line,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    }
}

/// A message whose encoding is its raw bytes
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage(pub Vec<u8>);

impl Message for RawMessage {
    fn encode(&self) -> Bytes {
        Bytes::from(self.0.clone())
    }

    fn decode(bytes: &[u8]) -> Result<Self, SigError> {
        Ok(RawMessage(bytes.to_vec()))
    }
}

/// A successful hash service body with the given request hash literals
#[allow(dead_code)]
pub fn hash_body(location_auth: i64, location: i64, request_hashes: &[&str]) -> String {
    format!(
        r#"{{"locationAuthHash":{},"locationHash":{},"requestHashes":[{}]}}"#,
        location_auth,
        location,
        request_hashes.join(",")
    )
}
