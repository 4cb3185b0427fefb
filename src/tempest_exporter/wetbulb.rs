// tempest_exporter - Prometheus metrics from WeatherFlow Tempest weather stations
//
// Copyright 2023 Nick Pillitteri
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

use std::error;
use std::fmt;

const MAX_ITERATIONS: usize = 10_000;
const INITIAL_STEP: f64 = 8.0;
const TOLERANCE_HPA: f64 = 0.001;

/// Returned when the wet-bulb search doesn't converge within its iteration budget.
///
/// This indicates inputs outside the range the search can handle and should be
/// treated as fatal by callers rather than replaced with some default value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceError {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub station_pressure_hpa: f64,
}

impl fmt::Display for ConvergenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wet-bulb temperature failed to converge after {} iterations \
             (temperature {}c, humidity {}%, pressure {}hPa)",
            MAX_ITERATIONS, self.temperature_c, self.humidity_percent, self.station_pressure_hpa
        )
    }
}

impl error::Error for ConvergenceError {}

/// Saturated vapor pressure in hPa at the given temperature.
fn saturated_vapor_pressure(temperature_c: f64) -> f64 {
    6.112 * ((17.67 * temperature_c) / (243.5 + temperature_c)).exp()
}

/// Vapor pressure in hPa implied by the psychrometric equation for a candidate wet-bulb temperature.
fn wet_bulb_vapor_pressure(temperature_c: f64, wet_bulb_c: f64, station_pressure_hpa: f64) -> f64 {
    saturated_vapor_pressure(wet_bulb_c)
        - station_pressure_hpa * (temperature_c - wet_bulb_c) * 0.00066 * (1.0 + 0.00115 * wet_bulb_c)
}

/// Compute the wet-bulb temperature in celsius for the given air temperature, relative
/// humidity (0-100), and station pressure.
///
/// The psychrometric equation gives vapor pressure for a wet-bulb temperature but can't
/// readily be inverted. Instead, guess a wet-bulb temperature and step towards the vapor
/// pressure implied by the relative humidity, reversing direction and taking a step a
/// quarter of the size each time we overshoot.
pub fn wet_bulb_temperature(
    temperature_c: f64,
    humidity_percent: f64,
    station_pressure_hpa: f64,
) -> Result<f64, ConvergenceError> {
    let actual = saturated_vapor_pressure(temperature_c) * (humidity_percent / 100.0);

    let mut step = INITIAL_STEP;
    let mut wet_bulb_c = temperature_c - step * 2.0;

    for _ in 0..MAX_ITERATIONS {
        let delta = actual - wet_bulb_vapor_pressure(temperature_c, wet_bulb_c, station_pressure_hpa);
        if delta.abs() < TOLERANCE_HPA {
            return Ok(wet_bulb_c);
        }

        if delta.is_sign_negative() != step.is_sign_negative() {
            // Overshot
            step *= -0.25;
        }

        wet_bulb_c += step;
    }

    Err(ConvergenceError {
        temperature_c,
        humidity_percent,
        station_pressure_hpa,
    })
}

#[cfg(test)]
mod test {
    use super::{saturated_vapor_pressure, wet_bulb_temperature};

    fn assert_close(expected: f64, got: f64) {
        assert!(
            (expected - got).abs() <= 0.01,
            "expected {:.2}, got {:.4}",
            expected,
            got
        );
    }

    #[test]
    fn test_saturated_vapor_pressure_freezing() {
        assert!((saturated_vapor_pressure(0.0) - 6.112).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wet_bulb_temperature_moderate_humidity() {
        assert_close(17.71, wet_bulb_temperature(25.0, 50.0, 900.0).unwrap());
    }

    #[test]
    fn test_wet_bulb_temperature_high_humidity() {
        assert_close(23.70, wet_bulb_temperature(25.0, 90.0, 900.0).unwrap());
    }

    #[test]
    fn test_wet_bulb_temperature_dry_high_pressure() {
        assert_close(18.92, wet_bulb_temperature(30.0, 33.0, 1050.0).unwrap());
    }

    #[test]
    fn test_wet_bulb_temperature_saturated() {
        // At 100% humidity the wet-bulb and air temperatures match
        assert_close(20.0, wet_bulb_temperature(20.0, 100.0, 1013.25).unwrap());
    }

    #[test]
    fn test_wet_bulb_temperature_not_a_number() {
        let res = wet_bulb_temperature(f64::NAN, 50.0, 1000.0);
        assert!(res.is_err());
    }
}
