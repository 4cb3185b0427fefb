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

use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::BTreeMap;

pub const LABEL_INSTANCE: &str = "instance";
pub const LABEL_KIND: &str = "kind";

const INSTANCE: &[&str] = &[LABEL_INSTANCE];
const INSTANCE_KIND: &[&str] = &[LABEL_INSTANCE, LABEL_KIND];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Name, help text, type, and label names of a metric.
///
/// Definitions are constants and every `Observation` refers to one of them.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MetricDef {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    pub labels: &'static [&'static str],
}

impl MetricDef {
    const fn gauge(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Gauge,
            labels,
        }
    }

    const fn counter(name: &'static str, help: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            help,
            kind: MetricKind::Counter,
            labels,
        }
    }
}

pub static UPTIME: MetricDef = MetricDef::counter("tempest_uptime_seconds_total", "The uptime of the device", INSTANCE);
pub static RSSI: MetricDef = MetricDef::gauge(
    "tempest_rssi_dbm",
    "A measurement of wireless signal strength",
    INSTANCE,
);
pub static REBOOTS: MetricDef = MetricDef::counter(
    "tempest_reboots_total",
    "The number of times the device has rebooted",
    INSTANCE,
);
pub static BUS_ERRORS: MetricDef = MetricDef::counter(
    "tempest_bus_errors_total",
    "The number of I2C bus errors experienced by the device",
    INSTANCE,
);
pub static ILLUMINANCE: MetricDef = MetricDef::gauge(
    "tempest_illuminance_lux",
    "A measurement of luminous flux per unit area",
    INSTANCE,
);
pub static UV: MetricDef = MetricDef::gauge(
    "tempest_uv_index",
    "A measurement of ultraviolet light intensity",
    INSTANCE,
);
pub static RAIN_RATE: MetricDef = MetricDef::gauge(
    "tempest_rain_rate_mm_min",
    "The amount of rain which fell on the sensor in the previous minute",
    INSTANCE,
);
/// Kinds "lull", "avg", "gust", and "rapid"
pub static WIND: MetricDef = MetricDef::gauge("tempest_wind_ms", "A wind speed measurement", INSTANCE_KIND);
pub static WIND_DIRECTION: MetricDef = MetricDef::gauge(
    "tempest_wind_direction_degrees",
    "The direction from which the wind is blowing",
    INSTANCE,
);
pub static BATTERY: MetricDef = MetricDef::gauge(
    "tempest_battery_volts",
    "The electric potential of the battery",
    INSTANCE,
);
pub static REPORT_INTERVAL: MetricDef = MetricDef::gauge(
    "tempest_report_interval_s",
    "The interval over which the station makes reports",
    INSTANCE,
);
pub static IRRADIANCE: MetricDef = MetricDef::gauge(
    "tempest_irradiance_w_m2",
    "The total solar irradiance, expressed in watts per square meter",
    INSTANCE,
);
pub static RAIN_TOTAL: MetricDef = MetricDef::counter(
    "tempest_rainfall_total",
    "The amount of accumulated rain",
    INSTANCE,
);
pub static PRESSURE: MetricDef = MetricDef::gauge("tempest_pressure_pa", "A barometric pressure measurement", INSTANCE);
/// Kinds "air" and "wetbulb"
pub static TEMPERATURE: MetricDef = MetricDef::gauge(
    "tempest_temperature_c",
    "A temperature measurement",
    INSTANCE_KIND,
);
pub static HUMIDITY: MetricDef = MetricDef::gauge(
    "tempest_humidity_percent",
    "A relative humidity measurement",
    INSTANCE,
);

/// Every metric that may be emitted, in the order families are encoded.
pub static ALL: [&MetricDef; 16] = [
    &UPTIME,
    &RSSI,
    &REBOOTS,
    &BUS_ERRORS,
    &ILLUMINANCE,
    &UV,
    &RAIN_RATE,
    &WIND,
    &WIND_DIRECTION,
    &BATTERY,
    &REPORT_INTERVAL,
    &IRRADIANCE,
    &RAIN_TOTAL,
    &PRESSURE,
    &TEMPERATURE,
    &HUMIDITY,
];

/// A single timestamped value for one of the defined metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub def: &'static MetricDef,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    /// Seconds since the UNIX epoch
    pub timestamp: i64,
}

impl Observation {
    /// Create a new observation with the `instance` label set to `instance`.
    pub fn new(def: &'static MetricDef, instance: &str, value: f64, timestamp: i64) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_INSTANCE.to_owned(), instance.to_owned());

        Self {
            def,
            value,
            labels,
            timestamp,
        }
    }

    /// Add a `kind` label to this observation.
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.labels.insert(LABEL_KIND.to_owned(), kind.to_owned());
        self
    }

    pub fn name(&self) -> &'static str {
        self.def.name
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(|v| v.as_str())
    }

    /// Convert to a Prometheus sample, `None` if the timestamp can't be expressed in
    /// milliseconds.
    fn to_metric(&self) -> Option<Metric> {
        let timestamp_ms = self.timestamp.checked_mul(1000)?;
        let mut m = Metric::default();
        for (name, value) in self.labels.iter() {
            let mut pair = LabelPair::default();
            pair.set_name(name.clone());
            pair.set_value(value.clone());
            m.mut_label().push(pair);
        }

        match self.def.kind {
            MetricKind::Gauge => {
                let mut g = Gauge::default();
                g.set_value(self.value);
                m.set_gauge(g);
            }
            MetricKind::Counter => {
                let mut c = Counter::default();
                c.set_value(self.value);
                m.set_counter(c);
            }
        }

        m.set_timestamp_ms(timestamp_ms);
        Some(m)
    }
}

/// Group observations into one Prometheus metric family per definition.
///
/// Families are returned in the order of `ALL` and samples within a family keep the
/// order they were observed in. Definitions without any observations are omitted, as are
/// observations with timestamps too large to encode.
pub fn families(observations: &[Observation]) -> Vec<MetricFamily> {
    let mut out = Vec::new();

    for def in ALL.iter() {
        let mut family = MetricFamily::default();
        family.set_name(def.name.to_owned());
        family.set_help(def.help.to_owned());
        family.set_field_type(match def.kind {
            MetricKind::Gauge => MetricType::GAUGE,
            MetricKind::Counter => MetricType::COUNTER,
        });

        for o in observations.iter().filter(|o| o.def == *def) {
            match o.to_metric() {
                Some(m) => family.mut_metric().push(m),
                None => tracing::warn!(
                    message = "skipping sample with invalid timestamp",
                    name = def.name,
                    timestamp = o.timestamp,
                ),
            }
        }

        if !family.get_metric().is_empty() {
            out.push(family);
        }
    }

    out
}

/// Encode observations in the Prometheus text exposition format, writing them to `w`.
pub fn encode_text<W: std::io::Write>(observations: &[Observation], w: &mut W) -> prometheus::Result<()> {
    TextEncoder::new().encode(&families(observations), w)
}
