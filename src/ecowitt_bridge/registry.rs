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

use crate::translate::description;
use prometheus::{Gauge, Registry};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Error creating or registering the gauge for a metric name.
#[derive(Debug)]
pub enum RegistryError {
    Declare(String, prometheus::Error),
    Register(String, prometheus::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Declare(name, e) => write!(f, "unable to declare gauge {}: {}", name, e),
            RegistryError::Register(name, e) => write!(f, "unable to register gauge {}: {}", name, e),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RegistryError::Declare(_, ref e) => Some(e),
            RegistryError::Register(_, ref e) => Some(e),
        }
    }
}

/// Gauges for every reading seen from the weather station, created the first
/// time each metric name is seen and registered with a Prometheus registry
/// for exposition.
///
/// Gauges are never removed. Each holds the last value reported by the station.
pub struct GaugeRegistry {
    registry: Registry,
    gauges: Mutex<HashMap<String, Gauge>>,
}

impl GaugeRegistry {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Set the gauge for `name` to `value`, creating and registering it first if
    /// this is the first time `name` has been seen. Help text for new gauges is
    /// based on the name of the metric.
    pub fn update(&self, name: &str, value: f64) -> Result<(), RegistryError> {
        // Creation happens with the lock held so concurrent uploads can't race to
        // register the same name. Setting the value itself is atomic.
        let mut gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(gauge) = gauges.get(name) {
            gauge.set(value);
            return Ok(());
        }

        let help = description(name);
        let gauge = Gauge::new(name, help).map_err(|e| RegistryError::Declare(name.to_owned(), e))?;
        self.registry
            .register(Box::new(gauge.clone()))
            .map_err(|e| RegistryError::Register(name.to_owned(), e))?;

        tracing::debug!(message = "created gauge", name = %name, help = %help);

        gauge.set(value);
        gauges.insert(name.to_owned(), gauge);
        Ok(())
    }

    /// Current value of the gauge for `name` if it exists.
    pub fn value(&self, name: &str) -> Option<f64> {
        let gauges = self.gauges.lock().unwrap_or_else(PoisonError::into_inner);
        gauges.get(name).map(|g| g.get())
    }

    pub fn len(&self) -> usize {
        self.gauges.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prometheus registry that gauges are registered with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::{GaugeRegistry, RegistryError};
    use prometheus::Registry;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_update_creates_single_gauge() {
        let gauges = GaugeRegistry::new(Registry::new());

        gauges.update("ecowitt_tempc", 0.0).unwrap();
        gauges.update("ecowitt_tempc", 10.0).unwrap();

        assert_eq!(1, gauges.len());
        assert_eq!(Some(10.0), gauges.value("ecowitt_tempc"));

        let families = gauges.registry().gather();
        assert_eq!(1, families.len());
        assert_eq!("ecowitt_tempc", families[0].get_name());
        assert_eq!("Outdoor temperature in celsius", families[0].get_help());
    }

    #[test]
    fn test_update_default_description() {
        let gauges = GaugeRegistry::new(Registry::new());
        gauges.update("ecowitt_new_metric", 123.45).unwrap();

        let families = gauges.registry().gather();
        assert_eq!("ECOWITT data gauge", families[0].get_help());
        assert_eq!(Some(123.45), gauges.value("ecowitt_new_metric"));
    }

    #[test]
    fn test_update_invalid_name() {
        let gauges = GaugeRegistry::new(Registry::new());
        let res = gauges.update("ecowitt_bad-name", 1.0);

        assert!(matches!(res, Err(RegistryError::Declare(_, _))));
        assert!(gauges.is_empty());
    }

    #[test]
    fn test_update_already_registered_elsewhere() {
        let registry = Registry::new();
        let other = prometheus::Gauge::new("ecowitt_uv", "something else").unwrap();
        registry.register(Box::new(other)).unwrap();

        let gauges = GaugeRegistry::new(registry);
        let res = gauges.update("ecowitt_uv", 1.0);

        assert!(matches!(res, Err(RegistryError::Register(_, _))));
        assert_eq!(None, gauges.value("ecowitt_uv"));
    }

    #[test]
    fn test_update_concurrent_distinct_names() {
        let gauges = Arc::new(GaugeRegistry::new(Registry::new()));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let gauges = gauges.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        gauges.update(&format!("ecowitt_sensor{}", i), j as f64).unwrap();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(16, gauges.len());
        assert_eq!(16, gauges.registry().gather().len());
        for i in 0..16 {
            assert_eq!(Some(49.0), gauges.value(&format!("ecowitt_sensor{}", i)));
        }
    }

    #[test]
    fn test_update_concurrent_same_name() {
        let gauges = Arc::new(GaugeRegistry::new(Registry::new()));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gauges = gauges.clone();
                thread::spawn(move || gauges.update("ecowitt_humidity", 50.0).is_ok())
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }

        let families = gauges.registry().gather();
        assert_eq!(1, gauges.len());
        assert_eq!(1, families.len());
        assert_eq!(1, families[0].get_metric().len());
    }
}
