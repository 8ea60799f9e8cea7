// Loopback redirect listener for the interactive consent flow

use crate::error::{BoardError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) const CALLBACK_PATH: &str = "/oauth2callback";

const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Authorization complete</h1>\
    <p>You can close this window.</p></body></html>";

const FAILURE_PAGE: &str = "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
    <html><body><h1>Authorization failed</h1>\
    <p>You can close this window.</p></body></html>";

const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Parameters the provider appends to the redirect.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Parses `GET /oauth2callback?code=..&state=.. HTTP/1.1`.
/// Returns `None` for requests that are not the callback (favicon probes etc.).
pub(crate) fn parse_request_line(request_line: &str) -> Option<CallbackQuery> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }

    let target = parts.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != CALLBACK_PATH {
        return None;
    }

    let mut parsed = CallbackQuery::default();
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            let value = urlencoding::decode(&value.replace('+', " "))
                .map(|v| v.into_owned())
                .ok();
            match key {
                "code" => parsed.code = value,
                "state" => parsed.state = value,
                "error" => parsed.error = value,
                _ => {}
            }
        }
    }

    Some(parsed)
}

/// How long a connection may stay silent before it is dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts connections until the provider redirects back, then returns
/// `(code, state)`. A redirect carrying `error=` ends the wait with
/// `AuthorizationDenied`. Each connection is served on its own task, so a
/// browser's idle pre-connect cannot hold up the real redirect.
pub(crate) async fn wait_for_callback(listener: &TcpListener) -> Result<(String, String)> {
    let (tx, mut rx) = mpsc::channel(1);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("Consent callback connection from {}", peer);
                tokio::spawn(serve_connection(stream, tx.clone()));
            }
            Some(outcome) = rx.recv() => return outcome,
        }
    }
}

async fn serve_connection(mut stream: TcpStream, tx: mpsc::Sender<Result<(String, String)>>) {
    let (reader, mut writer) = stream.split();
    let mut request_line = String::new();

    let mut reader = BufReader::new(reader);
    match tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut request_line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!("Consent callback read failed: {}", e);
            return;
        }
        Err(_) => {
            debug!("Dropping idle consent callback connection");
            return;
        }
    }

    let Some(query) = parse_request_line(&request_line) else {
        let _ = writer.write_all(NOT_FOUND.as_bytes()).await;
        return;
    };

    let outcome = match query {
        CallbackQuery { error: Some(error), .. } => Err(BoardError::AuthorizationDenied(error)),
        CallbackQuery {
            code: Some(code),
            state: Some(state),
            ..
        } => Ok((code, state)),
        _ => Err(BoardError::AuthorizationDenied(
            "redirect carried no authorization code".to_string(),
        )),
    };

    let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    let _ = writer.write_all(page.as_bytes()).await;
    let _ = writer.shutdown().await;

    let _ = tx.send(outcome).await;
}
