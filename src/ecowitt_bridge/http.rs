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

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder, TEXT_FORMAT};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::task::{self, JoinError};
use tracing::{Instrument, Level};

const VERSION_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Error rendering the registry for a scrape.
#[derive(Debug)]
pub enum ScrapeError {
    Gather(JoinError),
    Encode(prometheus::Error),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapeError::Gather(e) => write!(f, "unable to gather metrics: {}", e),
            ScrapeError::Encode(e) => write!(f, "unable to encode metrics: {}", e),
        }
    }
}

impl Error for ScrapeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ScrapeError::Gather(ref e) => Some(e),
            ScrapeError::Encode(ref e) => Some(e),
        }
    }
}

/// State shared by every request to the metrics server: the registry holding
/// station gauges and bridge counters, and the version reported at `/version`.
pub struct RequestContext {
    registry: Registry,
    version: String,
}

impl RequestContext {
    pub fn new(registry: Registry, version: impl Into<String>) -> Self {
        RequestContext {
            registry,
            version: version.into(),
        }
    }

    /// Render every metric in the registry in the Prometheus text format.
    ///
    /// Gathering includes process metrics read from `/proc` so it runs on the
    /// blocking thread pool.
    pub async fn scrape(&self) -> Result<Vec<u8>, ScrapeError> {
        let registry = self.registry.clone();

        let families = task::spawn_blocking(move || registry.gather())
            .instrument(tracing::span!(Level::DEBUG, "ecowitt_gather"))
            .await
            .map_err(ScrapeError::Gather)?;

        tracing::debug!(message = "encoding metric families", num_metrics = families.len());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(ScrapeError::Encode)?;
        Ok(buffer)
    }

    fn version_text(&self) -> String {
        format!("Ecowitt Bridge Version: {}\n", self.version)
    }
}

/// Route requests to the metrics endpoint, `/metrics`, or the version endpoint, `/version`.
pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = match (&method, path.as_str()) {
        (&Method::GET, "/metrics") => match context.scrape().await {
            Ok(buffer) => http_body(TEXT_FORMAT, buffer),
            Err(e) => {
                tracing::error!(message = "error scraping metrics", error = %e);
                http_status_no_body(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },

        (&Method::GET, "/version") => http_body(VERSION_CONTENT_TYPE, context.version_text()),

        (_, "/metrics") | (_, "/version") => http_status_no_body(StatusCode::METHOD_NOT_ALLOWED),

        _ => http_status_no_body(StatusCode::NOT_FOUND),
    };

    Ok(res)
}

fn http_body<B: Into<Body>>(content_type: &'static str, body: B) -> Response<Body> {
    let mut res = Response::new(body.into());
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}

fn http_status_no_body(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}

#[cfg(test)]
mod tests {
    use super::{http_route, RequestContext};
    use crate::registry::GaugeRegistry;
    use hyper::{Body, Method, Request, StatusCode};
    use prometheus::Registry;
    use std::sync::Arc;

    fn context() -> Arc<RequestContext> {
        let gauges = GaugeRegistry::new(Registry::new());
        gauges.update("ecowitt_tempc", 21.5).unwrap();
        Arc::new(RequestContext::new(gauges.registry().clone(), "1.2.3"))
    }

    async fn request(method: Method, path: &str) -> (StatusCode, String) {
        let req = Request::builder().method(method).uri(path).body(Body::empty()).unwrap();
        let res = http_route(req, context()).await.unwrap();
        let status = res.status();
        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics() {
        let (status, body) = request(Method::GET, "/metrics").await;

        assert_eq!(StatusCode::OK, status);
        assert!(body.contains("# HELP ecowitt_tempc Outdoor temperature in celsius\n"));
        assert!(body.contains("ecowitt_tempc 21.5\n"));
    }

    #[tokio::test]
    async fn test_version() {
        let (status, body) = request(Method::GET, "/version").await;

        assert_eq!(StatusCode::OK, status);
        assert_eq!("Ecowitt Bridge Version: 1.2.3\n", body);
    }

    #[tokio::test]
    async fn test_metrics_wrong_method() {
        let (status, _) = request(Method::POST, "/metrics").await;
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, status);
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, _) = request(Method::GET, "/data/report/").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }
}
