//! One-shot loopback callback server.
//!
//! Each login attempt binds its own [`CallbackServer`] on an ephemeral
//! loopback port. The server builds a private `axum` router, captures the
//! first request to the callback path, answers it with an HTML page and shuts
//! down. Requests arriving after the capture get `410 Gone`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Upper bound on draining the connection that delivered the callback.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Query parameters of the authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackResult {
    /// Parse an `application/x-www-form-urlencoded` query string.
    ///
    /// Unknown keys are ignored. When a key repeats, the first value wins.
    pub fn from_query(query: &str) -> Self {
        let mut result = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut result.code,
                "state" => &mut result.state,
                "error" => &mut result.error,
                "error_description" => &mut result.error_description,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        result
    }
}

type Capture = Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>;

/// Loopback listener owned by a single login attempt.
#[derive(Debug)]
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
    path: String,
}

impl CallbackServer {
    /// Bind `127.0.0.1` on an OS-assigned port.
    pub async fn bind(path: &str) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .await
            .map_err(Error::ListenerBind)?;
        let port = listener.local_addr().map_err(Error::ListenerBind)?.port();
        debug!(port, "Callback listener bound");
        Ok(Self {
            listener,
            port,
            path: path.to_string(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until the first callback request arrives, then close the listener.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first and
    /// [`Error::CallbackTimeout`] if `timeout` elapses first. The listener is
    /// closed before this returns in every case.
    pub async fn wait(self, cancel: &CancellationToken, timeout: Duration) -> Result<CallbackResult> {
        let Self {
            listener,
            port,
            path,
        } = self;

        let (tx, rx) = oneshot::channel();
        let capture: Capture = Arc::new(Mutex::new(Some(tx)));
        let app = Router::new()
            .route(&path, get(handle_callback))
            .fallback(not_found)
            .with_state(capture);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        let outcome = tokio::select! {
            received = rx => received.map_err(capture_dropped),
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(Error::CallbackTimeout(timeout)),
        };

        shutdown.cancel();
        stop(server).await;
        debug!(port, captured = outcome.is_ok(), "Callback listener closed");
        outcome
    }
}

/// The capture sender lives in the router, so it only drops when the server
/// task has ended without a callback.
fn capture_dropped(_: oneshot::error::RecvError) -> Error {
    Error::CallbackServer("stopped before a callback request arrived".to_string())
}

async fn stop(server: JoinHandle<io::Result<()>>) {
    let abort = server.abort_handle();
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "Callback server failed"),
        Ok(Err(e)) => warn!(error = %e, "Callback server task failed"),
        Err(_) => {
            warn!("Callback server did not drain in time, aborting");
            abort.abort();
        }
    }
}

async fn handle_callback(
    State(capture): State<Capture>,
    method: Method,
    RawQuery(query): RawQuery,
) -> Response {
    // HEAD is routed here too; only the browser's GET may take the capture.
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, [(axum::http::header::ALLOW, "GET")]).into_response();
    }

    let sender = capture
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(sender) = sender else {
        debug!("Callback already captured, rejecting request");
        return (
            StatusCode::GONE,
            Html(error_html(
                "callback_consumed",
                "This sign-in request has already been completed.",
            )),
        )
            .into_response();
    };

    let result = CallbackResult::from_query(query.as_deref().unwrap_or_default());
    let response = match (&result.error, &result.code) {
        (Some(error), _) => {
            let description = result
                .error_description
                .as_deref()
                .unwrap_or("The authorization server reported an error.");
            warn!(error = %error, "Authorization server returned an error");
            (StatusCode::BAD_REQUEST, Html(error_html(error, description))).into_response()
        }
        (None, None) => (
            StatusCode::BAD_REQUEST,
            Html(error_html(
                "invalid_request",
                "The callback did not include an authorization code.",
            )),
        )
            .into_response(),
        (None, Some(_)) => Html(success_html()).into_response(),
    };

    // The receiver is gone if the attempt timed out in the meantime.
    let _ = sender.send(result);
    response
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

// =============================================================================
// HTML Response Generation
// =============================================================================

const PAGE_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);
            color: #e0e0e0;
        }
        .container { text-align: center; padding: 2rem; max-width: 500px; }
        .icon { font-size: 4rem; margin-bottom: 1rem; }
        p { color: #9ca3af; margin-bottom: 1rem; }
        .close-hint { font-size: 0.875rem; color: #6b7280; }
        .error-code { font-family: monospace; color: #f87171; }
"#;

/// Page shown after the browser delivered an authorization code.
pub fn success_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign-in Complete</title>
    <style>{PAGE_STYLE}        h1 {{ color: #34d399; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="icon">&#x2705;</div>
        <h1>Sign-in Complete</h1>
        <p>You can return to the application.</p>
        <p class="close-hint">It is safe to close this window.</p>
    </div>
</body>
</html>"#
    )
}

/// Page shown when the callback carries an error or no code.
pub fn error_html(error: &str, description: &str) -> String {
    let error_code = html_escape(error);
    let desc = html_escape(description);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign-in Failed</title>
    <style>{PAGE_STYLE}        h1 {{ color: #f87171; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="icon">&#x274C;</div>
        <h1>Sign-in Failed</h1>
        <p><strong>Error:</strong> <span class="error-code">{error_code}</span></p>
        <p><strong>Details:</strong> {desc}</p>
        <p class="close-hint">Please close this window and try again.</p>
    </div>
</body>
</html>"#
    )
}

/// Simple HTML escaping to prevent XSS.
fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
