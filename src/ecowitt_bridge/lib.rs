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

//! Relay Ecowitt weather station uploads and export readings as Prometheus metrics.
//!
//! ## Features
//!
//! `ecowitt_bridge` accepts uploads from an Ecowitt weather station (configured to use the
//! "customized" upload option in the Ecowitt or WS View app), sets a Prometheus gauge for
//! each reading in the upload, and optionally relays the upload to another collector.
//!
//! Readings are exported with an `ecowitt_` prefix. Some readings are converted to metric
//! units before being exported and renamed to match.
//!
//! * `temp*f` - Temperatures are converted to celsius and exported as `ecowitt_temp*c`.
//! * `barom*in` - Pressures are converted to hectopascals and exported as `ecowitt_barom*hpa`.
//! * `PASSKEY`, `stationtype`, `dateutc`, `freq`, `runtime`, `model` - Not exported.
//!
//! All other readings are exported as-is. Values that aren't numbers are exported as `0`.
//!
//! The following metrics about the bridge itself are exported:
//!
//! * `ecowitt_bridge_frames_total` - Number of uploads received.
//! * `ecowitt_bridge_datapoints_total` - Number of readings set on gauges.
//! * `ecowitt_bridge_errors_total{kind}` - Problems handling uploads by type.
//! * `ecowitt_bridge_forwards_total{result}` - Uploads relayed by result.
//!
//! ## Relaying
//!
//! When relaying is enabled each upload is sent to another collector after it has
//! been handled. Relaying never delays or fails handling of the upload. Two modes
//! are supported:
//!
//! * `raw` - The bytes of the upload are sent unmodified over a new TCP connection.
//! * `http` - The upload is rebuilt as an HTTP `POST` to a configured path, keeping
//!   the original headers except `Host`, `Content-Length`, and `Connection`.
//!
//! ## Usage
//!
//! ```text
//! ./ecowitt_bridge --listen-port 8082 --prom-port 9110 --resend-dest collector.example.com
//! ```
//!
//! Every option can also be set with an environment variable, see `--help`.
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9110` at `/metrics`. Configure scrapes of the
//! host running `ecowitt_bridge` by your Prometheus server.
//!
//! ```yaml
//! scrape_configs:
//!   - job_name: ecowitt_bridge
//!     static_configs:
//!       - targets: ['example:9110']
//! ```
//!

pub mod forward;
pub mod http;
pub mod listener;
pub mod metrics;
pub mod parser;
pub mod registry;
pub mod translate;
pub mod units;
