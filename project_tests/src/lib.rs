//! # Shared Test Fixtures
//!
//! Helpers used by the integration tests under `tests/`:
//!
//! - [`ScriptedTransport`]: an in-memory `Transport` that plays back a script
//!   of failures and responses per url and records every attempt it sees.
//! - [`MockHttpServer`]: a one-thread HTTP/1.1 server on a random local port
//!   that answers a fixed list of responses and captures the raw requests,
//!   for exercising `ApiClient` without leaving the machine.

#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use lib_request::core::{RequestDescriptor, Response, Transport, TransportError};

/// One scripted reaction of the [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Fail the attempt with this message.
    Fail(&'static str),
    /// Answer with this status and body.
    Respond(u16, &'static str),
    /// Panic inside the transport with this message.
    Panic(&'static str),
}

/// Plays back per-url scripts; unscripted calls succeed with
/// `"<url> attempt <n>"` as body.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    always_failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedTransport {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `steps` for `url`, consumed one per attempt.
    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    /// Every attempt at `url` fails once its script runs out.
    pub fn fail_always(&self, url: &str) {
        self.always_failing.lock().unwrap().insert(url.to_string());
    }

    /// Every descriptor executed so far, in order.
    pub fn log(&self) -> Vec<RequestDescriptor> {
        self.log.lock().unwrap().clone()
    }

    /// Urls executed so far, in order.
    pub fn urls(&self) -> Vec<String> {
        self.log().into_iter().map(|d| d.params.url).collect()
    }

    /// Total attempts.
    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Attempts at `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.params.url == url)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
        self.log.lock().unwrap().push(request.clone());
        let url = &request.params.url;

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|steps| steps.pop_front());
        let fails_always = self.always_failing.lock().unwrap().contains(url);
        let step = match step {
            Some(step) => step,
            None if fails_always => Step::Fail("always failing"),
            None => {
                return Ok(Response::new(
                    200,
                    format!("{} attempt {}", url, request.attempt()),
                ))
            }
        };

        // Give other tasks a chance to interleave, like a real network call.
        tokio::task::yield_now().await;
        match step {
            Step::Fail(message) => Err(TransportError::Other(anyhow::anyhow!(message))),
            Step::Respond(status, body) => Ok(Response::new(status, body)),
            Step::Panic(message) => panic!("{message}"),
        }
    }
}

/// # Mock HTTP Server
///
/// Accepts one connection per scripted response, answers it, closes it, and
/// hands back the raw requests on [`MockHttpServer::join`].
pub struct MockHttpServer {
    /// `http://127.0.0.1:<port>/`
    pub base_url: String,
    handle: JoinHandle<Vec<String>>,
}

/// What the server does with one connection.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with status and body.
    Status(u16, String),
    /// Read the request, then sit idle for this long before closing.
    Stall(Duration),
}

impl MockHttpServer {
    /// Starts the server on a random local port.
    pub fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
        let port = listener.local_addr().expect("listener has an address").port();

        let handle = thread::spawn(move || {
            let mut captured = Vec::new();
            for reply in replies {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                captured.push(read_request(&mut stream));
                match reply {
                    Reply::Status(status, body) => {
                        let head = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n",
                            status,
                            reason(status),
                            body.len()
                        );
                        let _ = stream.write_all(head.as_bytes());
                        let _ = stream.write_all(body.as_bytes());
                        let _ = stream.flush();
                    }
                    Reply::Stall(duration) => thread::sleep(duration),
                }
            }
            captured
        });

        Self {
            base_url: format!("http://127.0.0.1:{}/", port),
            handle,
        }
    }

    /// Waits for every scripted connection and returns the raw requests.
    pub fn join(self) -> Vec<String> {
        self.handle.join().expect("mock server thread panicked")
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Reads headers up to the blank line, then `Content-Length` bytes of body.
fn read_request(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];

    let header_end = loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return String::from_utf8_lossy(&raw).into_owned(),
            Ok(n) => n,
        };
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&raw).into_owned()
}
