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

//! Prometheus metrics from WeatherFlow Tempest weather stations
//!
//! ## Features
//!
//! `tempest_exporter` listens for the reports a [Tempest] hub broadcasts on the local network
//! and pushes them to a Prometheus [push gateway]. It can also fetch the complete history of
//! observations for your stations from the WeatherFlow REST API and write them to files that
//! can be used to backfill Prometheus. The following metrics are emitted, each with an `instance`
//! label set to the serial number of the device that made the report.
//!
//! * `tempest_wind_ms{kind=lull|avg|gust|rapid}` - Wind speed, in meters per second.
//! * `tempest_wind_direction_degrees` - Direction the wind is blowing from, in degrees.
//! * `tempest_pressure_pa` - Station pressure, in pascals.
//! * `tempest_temperature_c{kind=air|wetbulb}` - Temperature, in degrees celsius.
//! * `tempest_humidity_percent` - Relative humidity (0-100).
//! * `tempest_illuminance_lux` - Illuminance, in lux.
//! * `tempest_uv_index` - UV index.
//! * `tempest_irradiance_w_m2` - Solar irradiance, in watts per square meter.
//! * `tempest_rain_rate_mm_min` - Rain over the previous minute, in millimeters.
//! * `tempest_battery_volts` - Battery voltage.
//! * `tempest_report_interval_s` - Interval between observations, in seconds.
//! * `tempest_uptime_seconds_total` - Hub uptime, in seconds.
//! * `tempest_rssi_dbm` - Hub wireless signal strength.
//! * `tempest_reboots_total` - Number of hub reboots.
//! * `tempest_bus_errors_total` - Number of hub I2C bus errors.
//!
//! Wet-bulb temperatures are only emitted when the `--wet-bulb` flag is used.
//!
//! [Tempest]: https://weatherflow.github.io/Tempest/api/udp/v143/
//! [push gateway]: https://github.com/prometheus/pushgateway
//!
//! ## Build
//!
//! `tempest_exporter` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/tempest_exporter.git && cd tempest_exporter
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Live
//!
//! Run `tempest_exporter` on a machine on the same network as your Tempest hub, pointing it at
//! your push gateway. Reports are received on UDP port `50222`.
//!
//! ```text
//! ./tempest_exporter listen --push-url http://localhost:9091 --job-name tempest
//! ```
//!
//! ### Backfill
//!
//! Create a personal access token for the WeatherFlow API and export all observations for your
//! stations to `tempest_001.txt.gz`, `tempest_002.txt.gz`, etc. in the current directory.
//!
//! ```text
//! ./tempest_exporter export --token $TOKEN
//! ```
//!

pub mod batch;
pub mod client;
pub mod derive;
pub mod export;
pub mod metrics;
pub mod push;
pub mod report;
pub mod udp;
pub mod wetbulb;
