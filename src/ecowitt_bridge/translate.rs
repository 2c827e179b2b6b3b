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

use crate::units::{fahrenheit_to_celsius, inches_to_hectopascals};

/// Prefix added to every metric name created from a station upload.
pub const NAMESPACE: &str = "ecowitt_";

/// Help text used for metrics without a known description.
pub const DEFAULT_DESCRIPTION: &str = "ECOWITT data gauge";

/// Keys that describe the station or upload rather than a reading.
const SKIPPED_KEYS: &[&str] = &["PASSKEY", "stationtype", "dateutc", "freq", "runtime", "model"];

/// Final name and value of a reading, ready to be set on a gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
}

/// Translate a key and value from a station upload into a metric sample, converting
/// imperial units to metric and renaming the key to match. Returns `None` for keys
/// that aren't readings.
pub fn translate(key: &str, value: f64) -> Option<MetricSample> {
    if SKIPPED_KEYS.contains(&key) {
        return None;
    }

    let (name, value) = if key.starts_with("temp") && key.ends_with('f') {
        (format!("{}c", &key[..key.len() - 1]), fahrenheit_to_celsius(value))
    } else if key.starts_with("barom") && key.ends_with("in") {
        (format!("{}hpa", &key[..key.len() - 2]), inches_to_hectopascals(value))
    } else {
        (key.to_owned(), value)
    };

    Some(MetricSample {
        name: format!("{}{}", NAMESPACE, name),
        value,
    })
}

/// Help text for a translated metric name, with or without the namespace prefix.
pub fn description(name: &str) -> &'static str {
    let name = name.strip_prefix(NAMESPACE).unwrap_or(name);

    match name {
        "tempinc" => "Indoor temperature in celsius",
        "humidityin" => "Indoor relative humidity (0-100)",
        "baromrelhpa" => "Relative barometric pressure in hectopascals",
        "baromabshpa" => "Absolute barometric pressure in hectopascals",
        "tempc" => "Outdoor temperature in celsius",
        "humidity" => "Outdoor relative humidity (0-100)",
        "winddir" => "Wind direction in degrees",
        "windspeedmph" => "Wind speed in miles per hour",
        "windgustmph" => "Wind gust speed in miles per hour",
        "maxdailygust" => "Maximum wind gust today in miles per hour",
        "solarradiation" => "Solar radiation in watts per square meter",
        "uv" => "UV index",
        "rainratein" => "Rain rate in inches per hour",
        "eventrainin" => "Rain for the current event in inches",
        "hourlyrainin" => "Rain in the last hour in inches",
        "dailyrainin" => "Rain today in inches",
        "weeklyrainin" => "Rain this week in inches",
        "monthlyrainin" => "Rain this month in inches",
        "yearlyrainin" => "Rain this year in inches",
        "totalrainin" => "Total rain in inches",
        "wh65batt" => "WH65 sensor array battery state (0 is ok)",
        "wh25batt" => "WH25 indoor sensor battery state (0 is ok)",
        "temp1c" => "Channel 1 temperature in celsius",
        "humidity1" => "Channel 1 relative humidity (0-100)",
        "batt1" => "Channel 1 sensor battery state (0 is ok)",
        "temp2c" => "Channel 2 temperature in celsius",
        "humidity2" => "Channel 2 relative humidity (0-100)",
        "batt2" => "Channel 2 sensor battery state (0 is ok)",
        "pm25_ch1" => "Channel 1 PM2.5 concentration in micrograms per cubic meter",
        "pm25_avg_24h_ch1" => "Channel 1 24 hour average PM2.5 concentration in micrograms per cubic meter",
        "pm25batt1" => "Channel 1 PM2.5 sensor battery level",
        "soilmoisture1" => "Channel 1 soil moisture percentage",
        "soilbatt1" => "Channel 1 soil moisture sensor battery voltage",
        "lightning_num" => "Lightning strikes today",
        "lightning" => "Distance to the last lightning strike in kilometers",
        "wh57batt" => "WH57 lightning sensor battery level",
        _ => DEFAULT_DESCRIPTION,
    }
}
