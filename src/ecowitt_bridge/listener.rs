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

use crate::forward::RelayForwarder;
use crate::metrics::BridgeMetrics;
use crate::parser::{self, Datapoint};
use crate::registry::GaugeRegistry;
use crate::translate::translate;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time;
use tracing::{Instrument, Level};

/// Maximum size of a single upload. Anything past this is dropped.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Pending connection queue size for the ingest socket.
pub const LISTEN_BACKLOG: u32 = 128;

/// Pause after a failed accept, to avoid spinning when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

const HTTP_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";

/// Counts of what happened to the readings in a single upload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
}

/// Everything needed to handle an upload, shared by all connections.
pub struct Ingest {
    registry: Arc<GaugeRegistry>,
    metrics: BridgeMetrics,
    forwarder: Option<Arc<RelayForwarder>>,
    read_timeout: Duration,
}

impl Ingest {
    pub fn new(
        registry: Arc<GaugeRegistry>,
        metrics: BridgeMetrics,
        forwarder: Option<RelayForwarder>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            forwarder: forwarder.map(Arc::new),
            read_timeout,
        }
    }

    /// Parse an upload and set a gauge for each reading in it, in the order they
    /// appear. A reading that can't be parsed or set doesn't prevent the others
    /// from being set.
    pub fn process(&self, frame: &[u8]) -> FrameSummary {
        self.metrics.frame_received();

        let text = String::from_utf8_lossy(frame);
        let payload = parser::parse(&parser::frame_body(&text));
        let mut summary = FrameSummary {
            warnings: payload.warnings.len(),
            ..FrameSummary::default()
        };

        for warning in payload.warnings.iter() {
            self.metrics.error(warning.as_label());
        }

        for Datapoint { key, value } in payload.datapoints.iter() {
            let sample = match translate(key, *value) {
                Some(sample) => sample,
                None => {
                    tracing::trace!(message = "skipping key", key = %key);
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.registry.update(&sample.name, sample.value) {
                Ok(_) => {
                    tracing::debug!(message = "updated gauge", name = %sample.name, value = sample.value);
                    self.metrics.datapoint_updated();
                    summary.updated += 1;
                }
                Err(e) => {
                    tracing::warn!(message = "unable to update gauge", key = %key, value = *value, error = %e);
                    self.metrics.error("registry");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    async fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        let frame = match time::timeout(self.read_timeout, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                tracing::warn!(message = "unable to read upload", peer = %peer, error = %e);
                self.metrics.error("read");
                return;
            }
            Err(_) => {
                tracing::warn!(message = "timeout reading upload", peer = %peer, timeout = ?self.read_timeout);
                self.metrics.error("read_timeout");
                return;
            }
        };

        if frame.is_empty() {
            tracing::debug!(message = "connection closed without upload", peer = %peer);
            return;
        }

        if let Some(expected) = expected_length(&frame) {
            if expected > frame.len() {
                tracing::warn!(
                    message = "upload truncated",
                    peer = %peer,
                    expected_bytes = expected,
                    received_bytes = frame.len(),
                );
                self.metrics.error("truncated");
            }
        }

        let summary = self.process(&frame);
        tracing::info!(
            message = "processed upload",
            peer = %peer,
            bytes = frame.len(),
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            warnings = summary.warnings,
        );

        if is_http_request(&frame) {
            if let Err(e) = stream.write_all(HTTP_OK).await {
                tracing::debug!(message = "unable to reply to client", peer = %peer, error = %e);
            }
        }

        let _ = stream.shutdown().await;
        drop(stream);

        if let Some(forwarder) = &self.forwarder {
            forwarder.spawn(frame, self.metrics.clone());
        }
    }
}

/// Accept station uploads over TCP, handling each connection in its own task.
pub struct IngestListener {
    listener: TcpListener,
    ingest: Arc<Ingest>,
}

impl IngestListener {
    /// Bind to the given address with `SO_REUSEADDR` set so that restarts don't
    /// have to wait for old connections to leave `TIME_WAIT`.
    pub fn bind(addr: SocketAddr, ingest: Ingest) -> io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        Ok(Self {
            listener,
            ingest: Arc::new(ingest),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. Errors handling a connection are logged and
    /// never stop the next connection from being accepted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(message = "accepted connection", peer = %peer);
                    let ingest = self.ingest.clone();

                    tokio::spawn(async move {
                        ingest
                            .handle(stream, peer)
                            .instrument(tracing::span!(Level::DEBUG, "ecowitt_upload", peer = %peer))
                            .await
                    });
                }
                Err(e) => {
                    tracing::error!(message = "unable to accept connection", error = %e);
                    time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Read a single upload of at most `MAX_FRAME_SIZE` bytes.
///
/// The first read is always used. Reading only continues if the upload has HTTP
/// headers with a `Content-Length` that hasn't been fully received yet.
async fn read_frame<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0; MAX_FRAME_SIZE];
    let mut len = stream.read(&mut buf).await?;

    while len > 0 && len < MAX_FRAME_SIZE {
        match expected_length(&buf[..len]) {
            Some(expected) if expected > len => {}
            _ => break,
        }

        let n = stream.read(&mut buf[len..]).await?;
        if n == 0 {
            break;
        }

        len += n;
    }

    buf.truncate(len);
    Ok(buf)
}

/// Total length of an upload (headers and body) based on its `Content-Length`
/// header, if it has complete headers that include one. Lengths too large to
/// represent are clamped to `usize::MAX`, which is always past `MAX_FRAME_SIZE`.
fn expected_length(frame: &[u8]) -> Option<usize> {
    let end = frame.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&frame[..end]);

    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .map(|body| end.saturating_add(body))
}

/// True if the first line of the upload is an HTTP request line.
fn is_http_request(frame: &[u8]) -> bool {
    let line = frame.split(|&b| b == b'\n').next().unwrap_or_default();
    String::from_utf8_lossy(line).trim_end().contains(" HTTP/1.")
}
