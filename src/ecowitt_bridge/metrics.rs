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

use prometheus::{Counter, CounterVec, Opts, Registry};

/// Counters describing the work done by the bridge itself, as opposed to the
/// readings from the weather station.
#[derive(Clone)]
pub struct BridgeMetrics {
    frames: Counter,
    datapoints: Counter,
    errors: CounterVec,
    forwards: CounterVec,
}

impl BridgeMetrics {
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let frames = Counter::new("ecowitt_bridge_frames_total", "Number of uploads received")?;
        let datapoints = Counter::new("ecowitt_bridge_datapoints_total", "Number of readings set on gauges")?;
        let errors = CounterVec::new(
            Opts::new("ecowitt_bridge_errors_total", "Number of problems handling uploads by type"),
            &["kind"],
        )?;
        let forwards = CounterVec::new(
            Opts::new("ecowitt_bridge_forwards_total", "Number of uploads relayed by result"),
            &["result"],
        )?;

        reg.register(Box::new(frames.clone()))?;
        reg.register(Box::new(datapoints.clone()))?;
        reg.register(Box::new(errors.clone()))?;
        reg.register(Box::new(forwards.clone()))?;

        Ok(Self {
            frames,
            datapoints,
            errors,
            forwards,
        })
    }

    pub fn frame_received(&self) {
        self.frames.inc();
    }

    pub fn datapoint_updated(&self) {
        self.datapoints.inc();
    }

    pub fn error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }

    pub fn forwarded(&self, result: &str) {
        self.forwards.with_label_values(&[result]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::BridgeMetrics;
    use prometheus::Registry;

    #[test]
    fn test_register_twice_fails() {
        let reg = Registry::new();
        assert!(BridgeMetrics::new(&reg).is_ok());
        assert!(BridgeMetrics::new(&reg).is_err());
    }

    #[test]
    fn test_counters_exposed() {
        let reg = Registry::new();
        let metrics = BridgeMetrics::new(&reg).unwrap();

        metrics.frame_received();
        metrics.error("read_timeout");
        metrics.forwarded("sent");

        let families = reg.gather();
        let errors = families
            .iter()
            .find(|f| f.get_name() == "ecowitt_bridge_errors_total")
            .unwrap();

        assert_eq!(1, errors.get_metric().len());
        assert_eq!(1.0, errors.get_metric()[0].get_counter().get_value());
    }
}
