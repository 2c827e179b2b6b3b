// Ecowitt Bridge - Weather station relay and metrics exporter for Prometheus
//
// Copyright 2024 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::BridgeMetrics;
use std::error::Error;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{Instrument, Level};

/// Maximum number of bytes of the downstream response read to determine success.
const RESPONSE_BUFFER_SIZE: usize = 1024;

/// Inbound headers that are replaced when reconstructing a request.
const REPLACED_HEADERS: &[&str] = &["host", "content-length", "connection"];

/// How uploads are sent to the downstream collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Copy the bytes of the upload as-is.
    Raw,
    /// Rebuild the upload as an HTTP POST to the configured path.
    Http,
}

impl FromStr for ForwardMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(ForwardMode::Raw),
            "http" => Ok(ForwardMode::Http),
            _ => Err(format!("unknown resend mode '{}', expected 'raw' or 'http'", s)),
        }
    }
}

impl fmt::Display for ForwardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMode::Raw => f.write_str("raw"),
            ForwardMode::Http => f.write_str("http"),
        }
    }
}

/// Where and how to relay uploads.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub mode: ForwardMode,
    pub timeout: Duration,
}

/// Result of relaying an upload that didn't fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Raw bytes were written, no response is expected.
    Sent,
    /// The collector responded with `200 OK`.
    Accepted,
    /// The collector responded with something else, the status line is included.
    Rejected(String),
    /// The collector closed the connection or the response couldn't be read.
    NoResponse,
}

impl ForwardOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            ForwardOutcome::Sent => "sent",
            ForwardOutcome::Accepted => "accepted",
            ForwardOutcome::Rejected(_) => "rejected",
            ForwardOutcome::NoResponse => "no_response",
        }
    }
}

/// Error relaying an upload to the downstream collector.
#[derive(Debug)]
pub enum ForwardError {
    Connect(String, io::Error),
    Write(String, io::Error),
    Timeout(String, Duration),
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardError::Connect(dest, e) => write!(f, "unable to connect to {}: {}", dest, e),
            ForwardError::Write(dest, e) => write!(f, "unable to write to {}: {}", dest, e),
            ForwardError::Timeout(dest, t) => write!(f, "timeout after {:?} relaying to {}", t, dest),
        }
    }
}

impl Error for ForwardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ForwardError::Connect(_, ref e) => Some(e),
            ForwardError::Write(_, ref e) => Some(e),
            ForwardError::Timeout(_, _) => None,
        }
    }
}

/// Relay uploads to a downstream collector over a new TCP connection per upload.
pub struct RelayForwarder {
    config: ForwardConfig,
}

impl RelayForwarder {
    pub fn new(config: ForwardConfig) -> Self {
        Self { config }
    }

    /// `host:port` of the downstream collector.
    pub fn destination(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Relay an upload, returning an error if the collector couldn't be reached or
    /// the upload couldn't be written before the configured timeout. Reading the
    /// collector response shares the same deadline but running out of time while
    /// waiting for it only results in `ForwardOutcome::NoResponse`.
    pub async fn forward(&self, frame: &[u8]) -> Result<ForwardOutcome, ForwardError> {
        let deadline = time::Instant::now() + self.config.timeout;
        let (mut stream, expect_response) = match time::timeout_at(deadline, self.deliver(frame)).await {
            Ok(res) => res?,
            Err(_) => return Err(ForwardError::Timeout(self.destination(), self.config.timeout)),
        };

        if !expect_response {
            return Ok(ForwardOutcome::Sent);
        }

        match time::timeout_at(deadline, read_response(&mut stream)).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => {
                tracing::warn!(message = "timeout waiting for collector response", timeout = ?self.config.timeout);
                Ok(ForwardOutcome::NoResponse)
            }
        }
    }

    /// Relay an upload in a background task, logging the result. Failures have no
    /// effect on the connection the upload was received on.
    pub fn spawn(self: &Arc<Self>, frame: Vec<u8>, metrics: BridgeMetrics) -> JoinHandle<()> {
        let forwarder = Arc::clone(self);
        let span = tracing::span!(Level::DEBUG, "ecowitt_forward", dest = %forwarder.destination());

        tokio::spawn(
            async move {
                match forwarder.forward(&frame).await {
                    Ok(ForwardOutcome::Rejected(status)) => {
                        tracing::warn!(message = "collector rejected relayed upload", status = %status);
                        metrics.forwarded("rejected");
                    }
                    Ok(outcome) => {
                        tracing::info!(message = "relayed upload", result = outcome.as_label(), bytes = frame.len());
                        metrics.forwarded(outcome.as_label());
                    }
                    Err(e) => {
                        tracing::error!(message = "unable to relay upload", error = %e);
                        metrics.forwarded("error");
                    }
                }
            }
            .instrument(span),
        )
    }

    // Connect and write the upload, returning the stream and whether a response
    // from the collector should be read. The stream is closed when dropped.
    async fn deliver(&self, frame: &[u8]) -> Result<(TcpStream, bool), ForwardError> {
        let mut stream = TcpStream::connect((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ForwardError::Connect(self.destination(), e))?;

        let rebuilt = match self.config.mode {
            ForwardMode::Http if has_body_separator(frame) => Some(build_http_request(
                frame,
                &self.config.host,
                self.config.port,
                &self.config.path,
            )),
            ForwardMode::Http => {
                tracing::warn!(
                    message = "upload has no HTTP headers to rebuild, relaying unmodified",
                    bytes = frame.len(),
                );
                None
            }
            ForwardMode::Raw => None,
        };

        let bytes = rebuilt.as_deref().unwrap_or(frame);
        stream
            .write_all(bytes)
            .await
            .map_err(|e| ForwardError::Write(self.destination(), e))?;

        if rebuilt.is_none() {
            let _ = stream.shutdown().await;
        }

        Ok((stream, rebuilt.is_some()))
    }
}

/// Read a single chunk of the collector response and classify it.
async fn read_response(stream: &mut TcpStream) -> ForwardOutcome {
    let mut buf = [0; RESPONSE_BUFFER_SIZE];

    match stream.read(&mut buf).await {
        Ok(0) => ForwardOutcome::NoResponse,
        Ok(n) => {
            let response = String::from_utf8_lossy(&buf[..n]);
            if response.contains("200 OK") {
                ForwardOutcome::Accepted
            } else {
                ForwardOutcome::Rejected(response.lines().next().unwrap_or_default().to_owned())
            }
        }
        Err(e) => {
            tracing::warn!(message = "unable to read collector response", error = %e);
            ForwardOutcome::NoResponse
        }
    }
}

/// Position and length of the blank line separating headers from the body.
fn body_separator(text: &str) -> Option<(usize, usize)> {
    text.find("\r\n\r\n")
        .map(|i| (i, 4))
        .or_else(|| text.find("\n\n").map(|i| (i, 2)))
}

fn has_body_separator(frame: &[u8]) -> bool {
    body_separator(&String::from_utf8_lossy(frame)).is_some()
}

/// Split an upload into header name/value pairs (excluding the request line) and
/// the body following the first blank line, with trailing whitespace removed.
pub fn split_frame(text: &str) -> (Vec<(&str, &str)>, &str) {
    let (head, body) = match body_separator(text) {
        Some((i, len)) => (&text[..i], &text[i + len..]),
        None => (text, ""),
    };

    let headers = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect();

    (headers, body.trim_end())
}

/// Rebuild an upload as an HTTP POST to `path` on `host:port`, keeping the inbound
/// headers except the ones describing the original connection and body.
pub fn build_http_request(frame: &[u8], host: &str, port: u16, path: &str) -> Vec<u8> {
    let text = String::from_utf8_lossy(frame);
    let (headers, body) = split_frame(&text);

    let mut lines = vec![format!("POST {} HTTP/1.1", path), format!("Host: {}:{}", host, port)];
    lines.extend(
        headers
            .into_iter()
            .filter(|(name, _)| !REPLACED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)))
            .map(|(name, value)| format!("{}: {}", name, value)),
    );
    lines.push(format!("Content-Length: {}", body.len()));
    lines.push("Connection: close".to_owned());

    let mut request = lines.join("\r\n").into_bytes();
    request.extend_from_slice(b"\r\n\r\n");
    request.extend_from_slice(body.as_bytes());
    request
}
