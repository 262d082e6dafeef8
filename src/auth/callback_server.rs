//! OAuth2 callback listener
//!
//! A short-lived local HTTP listener that captures the authorization code
//! from the browser redirect. Moves through
//! `Idle -> Listening -> (Captured | TimedOut | Errored) -> Stopped`.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use url::Url;
use crate::Result;
use crate::config::CallbackConfig;
use crate::error::Error;
use super::cipher::secure_compare;

/// How many consecutive ports to try above the preferred one
const MAX_PORT_ATTEMPTS: u16 = 10;

/// How long a connection may take to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request head the listener will buffer
const MAX_REQUEST_BYTES: usize = 8192;

/// Success HTML page shown after authorization
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>taskgate | Authorization Successful</title>
    <style>
        body {
            background-color: #0b0e14;
            color: #e2e8f0;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #22c55e; margin: 0 0 12px; }
        p { font-size: 15px; color: #94a3b8; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>Authorization Successful</h1>
        <p>taskgate has been granted access.<br>You can close this window and return to your terminal.</p>
    </div>
</body>
</html>"#;

/// Error HTML page
const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>taskgate | Authorization Failed</title>
    <style>
        body {
            background-color: #0b0e14;
            color: #e2e8f0;
            font-family: -apple-system, system-ui, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            text-align: center;
        }
        h1 { font-size: 24px; color: #ef4444; margin: 0 0 12px; }
        p { font-size: 15px; color: #94a3b8; line-height: 1.6; }
    </style>
</head>
<body>
    <div>
        <h1>Authorization Failed</h1>
        <p>Something went wrong during authorization.<br>Please try again or check your terminal.</p>
    </div>
</body>
</html>"#;

const NOT_FOUND_BODY: &str = "Not Found";

/// Lifecycle of a callback listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening { port: u16 },
    Captured,
    TimedOut,
    Errored,
    Stopped,
}

/// Parsed query of a request to the callback path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Captures exactly one authorization redirect
#[derive(Debug)]
pub struct CallbackListener {
    host: String,
    preferred_port: u16,
    path: String,
    timeout: Duration,
    expected_state: Option<String>,
    listener: Option<TcpListener>,
    state: ListenerState,
}

impl CallbackListener {
    pub fn new(config: &CallbackConfig) -> Self {
        Self {
            host: config.host.clone(),
            preferred_port: config.port,
            path: config.path.clone(),
            timeout: config.timeout(),
            expected_state: None,
            listener: None,
            state: ListenerState::Idle,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Port the listener is bound to, if listening
    pub fn port(&self) -> Option<u16> {
        match self.state {
            ListenerState::Listening { port } => Some(port),
            _ => None,
        }
    }

    /// Require callbacks to carry this anti-replay state
    pub fn expect_state(&mut self, state: impl Into<String>) {
        self.expected_state = Some(state.into());
    }

    /// Bind the listener, walking up from the preferred port while it is in use.
    ///
    /// Returns the port actually bound.
    pub async fn start(&mut self) -> Result<u16> {
        if let ListenerState::Listening { port } = self.state {
            return Ok(port);
        }

        let mut port = self.preferred_port;
        for _ in 0..MAX_PORT_ATTEMPTS {
            match TcpListener::bind((self.host.as_str(), port)).await {
                Ok(listener) => {
                    let bound = listener.local_addr()?.port();
                    tracing::info!("Callback server listening on http://{}:{}{}", self.host, bound, self.path);
                    self.listener = Some(listener);
                    self.state = ListenerState::Listening { port: bound };
                    return Ok(bound);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    tracing::debug!("Port {} in use, trying next", port);
                    port = port.checked_add(1).ok_or_else(|| {
                        Error::OAuth("No free callback port available".to_string())
                    })?;
                }
                Err(e) => {
                    self.state = ListenerState::Errored;
                    return Err(Error::OAuth(format!(
                        "Failed to start callback server on {}:{}: {}",
                        self.host, port, e
                    )));
                }
            }
        }

        self.state = ListenerState::Errored;
        Err(Error::OAuth(format!(
            "No free callback port in {}..{}",
            self.preferred_port, port
        )))
    }

    /// Wait for the redirect and return its authorization code.
    ///
    /// Requests to any other path get a 404 and keep the wait going.
    pub async fn await_result(&mut self) -> Result<String> {
        let listener = match (&self.listener, self.state) {
            (Some(listener), ListenerState::Listening { .. }) => listener,
            _ => return Err(Error::OAuth("Callback server is not listening".to_string())),
        };

        let outcome = tokio::time::timeout(
            self.timeout,
            serve_until_callback(listener, &self.path, self.expected_state.as_deref()),
        )
        .await;

        let (state, result) = match outcome {
            Ok(Ok(code)) => (ListenerState::Captured, Ok(code)),
            Ok(Err(e)) => (ListenerState::Errored, Err(e)),
            Err(_) => (ListenerState::TimedOut, Err(Error::CallbackTimeout(self.timeout))),
        };
        self.state = state;
        result
    }

    /// Close the listener. Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!("Callback server stopped");
        }
        self.state = ListenerState::Stopped;
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept connections until one hits the callback path.
///
/// Each connection is served on its own task, so a client that connects and
/// never sends a request cannot hold up the real redirect.
async fn serve_until_callback(
    listener: &TcpListener,
    path: &str,
    expected_state: Option<&str>,
) -> Result<String> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted
                    .map_err(|e| Error::OAuth(format!("Failed to accept connection: {}", e)))?;
                let path = path.to_string();
                let expected_state = expected_state.map(str::to_string);

                connections.spawn(async move {
                    handle_connection(socket, peer, &path, expected_state.as_deref()).await
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                match joined {
                    Ok(Some(result)) => return result,
                    Ok(None) => {}
                    Err(e) => tracing::debug!("Callback connection task failed: {}", e),
                }
            }
        }
    }
}

/// Serve one connection. `None` means the request was not the callback.
async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    path: &str,
    expected_state: Option<&str>,
) -> Option<Result<String>> {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut socket)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            tracing::debug!("Dropping unreadable request from {}: {}", peer, e);
            return None;
        }
        Err(_) => {
            tracing::debug!("Dropping idle connection from {}", peer);
            return None;
        }
    };

    let query = match parse_request_target(&request, path) {
        Some(query) => query,
        None => {
            respond(&mut socket, "404 Not Found", "text/plain", NOT_FOUND_BODY).await;
            return None;
        }
    };

    let result = evaluate_callback(query, expected_state);
    match &result {
        Ok(_) => respond(&mut socket, "200 OK", "text/html; charset=utf-8", SUCCESS_HTML).await,
        Err(_) => respond(&mut socket, "400 Bad Request", "text/html; charset=utf-8", ERROR_HTML).await,
    }
    Some(result)
}

/// Read until the end of the request headers, EOF, or `MAX_REQUEST_BYTES`
async fn read_request(socket: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    while buffer.len() < MAX_REQUEST_BYTES && !has_header_end(&buffer) {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    buffer.truncate(MAX_REQUEST_BYTES);
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn has_header_end(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|w| w == b"\r\n\r\n")
}

async fn respond(socket: &mut TcpStream, status: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    );

    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Query of a `GET <path>?...` request, or `None` for any other target
fn parse_request_target(request: &str, path: &str) -> Option<CallbackQuery> {
    // GET /oauth/callback?code=xxx&state=yyy HTTP/1.1
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;

    if method != "GET" {
        return None;
    }

    let url = Url::parse(&format!("http://localhost{}", target)).ok()?;
    if url.path() != path {
        return None;
    }

    let mut query = CallbackQuery::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => query.code = Some(value.into_owned()),
            "state" => query.state = Some(value.into_owned()),
            "error" => query.error = Some(value.into_owned()),
            "error_description" => query.error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    Some(query)
}

/// Turn a callback query into a code or the provider's error
fn evaluate_callback(query: CallbackQuery, expected_state: Option<&str>) -> Result<String> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_else(|| "Unknown error".to_string());
        return Err(Error::AuthorizationDenied { error, description });
    }

    if let Some(expected) = expected_state {
        match query.state.as_deref() {
            Some(state) if secure_compare(state, expected) => {}
            _ => return Err(Error::StateMismatch),
        }
    }

    query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| Error::OAuth("Missing authorization code".to_string()))
}
