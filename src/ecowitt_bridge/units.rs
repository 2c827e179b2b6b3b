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

use std::fmt;

const HPA_PER_INCH_MERCURY: f64 = 33.6585;

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureFahrenheit> for TemperatureCelsius {
    fn from(f: TemperatureFahrenheit) -> Self {
        TemperatureCelsius((f.0 - 32.0) * 5.0 / 9.0)
    }
}

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Temperature, in degrees fahrenheit
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureFahrenheit(f64);

impl From<f64> for TemperatureFahrenheit {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureFahrenheit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}f", self.0)
    }
}

/// Barometric pressure, in inches of mercury
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct PressureInches(f64);

impl From<f64> for PressureInches {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for PressureInches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}inHg", self.0)
    }
}

/// Barometric pressure, in hectopascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct PressureHectopascals(f64);

impl From<PressureInches> for PressureHectopascals {
    fn from(p: PressureInches) -> Self {
        PressureHectopascals(p.0 * HPA_PER_INCH_MERCURY)
    }
}

impl From<PressureHectopascals> for f64 {
    fn from(v: PressureHectopascals) -> Self {
        v.0
    }
}

impl fmt::Display for PressureHectopascals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}hPa", self.0)
    }
}

/// Convert degrees fahrenheit to degrees celsius.
pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    TemperatureCelsius::from(TemperatureFahrenheit::from(f)).into()
}

/// Convert inches of mercury to hectopascals.
pub fn inches_to_hectopascals(inches: f64) -> f64 {
    PressureHectopascals::from(PressureInches::from(inches)).into()
}

#[cfg(test)]
mod tests {
    use super::{fahrenheit_to_celsius, inches_to_hectopascals, PressureHectopascals, PressureInches};

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() < 0.01,
            "expected {} got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_fahrenheit_to_celsius_fixed_points() {
        assert_close(0.0, fahrenheit_to_celsius(32.0));
        assert_close(100.0, fahrenheit_to_celsius(212.0));
        assert_close(37.0, fahrenheit_to_celsius(98.6));
    }

    #[test]
    fn test_fahrenheit_to_celsius_below_zero() {
        assert_close(-40.0, fahrenheit_to_celsius(-40.0));
    }

    #[test]
    fn test_inches_to_hectopascals() {
        assert_close(1007.10, inches_to_hectopascals(29.92125));
        assert_close(0.0, inches_to_hectopascals(0.0));
    }

    #[test]
    fn test_pressure_display() {
        let p = PressureHectopascals::from(PressureInches::from(1.0));
        assert_eq!("33.6585hPa", p.to_string());
    }
}
