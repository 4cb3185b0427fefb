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

//! Reports sent by Tempest devices and hubs.
//!
//! See the [UDP API] for the format of each report. Reports returned by the REST API
//! for historical observations use the same format but omit the device serial number.
//!
//! [UDP API]: https://weatherflow.github.io/Tempest/api/udp/v143/

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ReportError {
    Malformed(serde_json::Error),
    MissingType,
    UnknownType(String),
    Schema(ReportType, serde_json::Error),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed report: {}", e),
            Self::MissingType => write!(f, "report missing type"),
            Self::UnknownType(t) => write!(f, "unhandled report type: {:?}", t),
            Self::Schema(t, e) => write!(f, "invalid {} report: {}", t, e),
        }
    }
}

impl error::Error for ReportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Malformed(e) => Some(e),
            Self::Schema(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Discriminator found in the `type` field of every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    RainStart,
    LightningStrike,
    RapidWind,
    StationObservation,
    DeviceStatus,
    HubStatus,
}

impl ReportType {
    pub const ALL: [ReportType; 6] = [
        Self::RainStart,
        Self::LightningStrike,
        Self::RapidWind,
        Self::StationObservation,
        Self::DeviceStatus,
        Self::HubStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RainStart => "evt_precip",
            Self::LightningStrike => "evt_strike",
            Self::RapidWind => "rapid_wind",
            Self::StationObservation => "obs_st",
            Self::DeviceStatus => "device_status",
            Self::HubStatus => "hub_status",
        }
    }

    pub fn from_type(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully decoded report of one of the known types.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    RainStart(RainStartReport),
    LightningStrike(LightningStrikeReport),
    RapidWind(RapidWindReport),
    StationObservation(ObservationReport),
    DeviceStatus(DeviceStatusReport),
    HubStatus(HubStatusReport),
}

impl Report {
    pub fn report_type(&self) -> ReportType {
        match self {
            Self::RainStart(_) => ReportType::RainStart,
            Self::LightningStrike(_) => ReportType::LightningStrike,
            Self::RapidWind(_) => ReportType::RapidWind,
            Self::StationObservation(_) => ReportType::StationObservation,
            Self::DeviceStatus(_) => ReportType::DeviceStatus,
            Self::HubStatus(_) => ReportType::HubStatus,
        }
    }

    pub fn serial_number(&self) -> &str {
        match self {
            Self::RainStart(r) => &r.serial_number,
            Self::LightningStrike(r) => &r.serial_number,
            Self::RapidWind(r) => &r.serial_number,
            Self::StationObservation(r) => &r.serial_number,
            Self::DeviceStatus(r) => &r.serial_number,
            Self::HubStatus(r) => &r.serial_number,
        }
    }

    /// Set the serial number of the device that made this report, used when the
    /// report itself doesn't include one (historical observations from the REST API).
    pub fn set_serial_number<S: Into<String>>(&mut self, serial_number: S) {
        let serial_number = serial_number.into();
        match self {
            Self::RainStart(r) => r.serial_number = serial_number,
            Self::LightningStrike(r) => r.serial_number = serial_number,
            Self::RapidWind(r) => r.serial_number = serial_number,
            Self::StationObservation(r) => r.serial_number = serial_number,
            Self::DeviceStatus(r) => r.serial_number = serial_number,
            Self::HubStatus(r) => r.serial_number = serial_number,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_: Option<String>,
}

/// Parse a JSON report, picking the schema to use based on its `type` field.
///
/// Parsing is all or nothing: payloads that aren't a JSON object, unknown types, and
/// payloads that don't match the schema for their type are all errors.
pub fn parse_report(bytes: &[u8]) -> Result<Report, ReportError> {
    let fields: Map<String, Value> = serde_json::from_slice(bytes).map_err(ReportError::Malformed)?;
    let value = Value::Object(fields);

    let envelope = Envelope::deserialize(&value).map_err(ReportError::Malformed)?;
    let type_ = envelope.type_.ok_or(ReportError::MissingType)?;
    let report_type = ReportType::from_type(&type_).ok_or(ReportError::UnknownType(type_))?;

    Ok(match report_type {
        ReportType::RainStart => Report::RainStart(decode(report_type, &value)?),
        ReportType::LightningStrike => Report::LightningStrike(decode(report_type, &value)?),
        ReportType::RapidWind => Report::RapidWind(decode(report_type, &value)?),
        ReportType::StationObservation => Report::StationObservation(decode(report_type, &value)?),
        ReportType::DeviceStatus => Report::DeviceStatus(decode(report_type, &value)?),
        ReportType::HubStatus => Report::HubStatus(decode(report_type, &value)?),
    })
}

fn decode<'a, T: Deserialize<'a>>(report_type: ReportType, value: &'a Value) -> Result<T, ReportError> {
    T::deserialize(value).map_err(|e| ReportError::Schema(report_type, e))
}

/// Devices send `null` for readings they don't have, decode them as zero. A `null`
/// in place of the whole list decodes as an empty list.
fn nullable_values<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let values: Option<Vec<Option<T>>> = Deserialize::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect())
}

fn nullable_rows<'de, D>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let rows: Option<Vec<Option<Vec<Option<f64>>>>> = Deserialize::deserialize(deserializer)?;
    Ok(rows
        .unwrap_or_default()
        .into_iter()
        .map(|row| {
            row.unwrap_or_default()
                .into_iter()
                .map(|v| v.unwrap_or_default())
                .collect()
        })
        .collect())
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RainStartReport {
    pub serial_number: String,
    pub hub_sn: String,
    /// 0: time epoch seconds
    #[serde(deserialize_with = "nullable_values")]
    pub evt: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct LightningStrikeReport {
    pub serial_number: String,
    pub hub_sn: String,
    /// 0: time epoch seconds, 1: distance km, 2: energy
    #[serde(deserialize_with = "nullable_values")]
    pub evt: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RapidWindReport {
    pub serial_number: String,
    pub hub_sn: String,
    /// 0: time epoch seconds, 1: wind speed m/s, 2: wind direction degrees
    #[serde(deserialize_with = "nullable_values")]
    pub ob: Vec<f64>,
}

/// Observation from a Tempest device, one or more rows per report.
///
/// Each row contains the following values:
///
/// | index | value                                  | units        |
/// |-------|----------------------------------------|--------------|
/// | 0     | time epoch                             | seconds      |
/// | 1     | wind lull (minimum 3 second sample)    | m/s          |
/// | 2     | wind avg (average over interval)       | m/s          |
/// | 3     | wind gust (maximum 3 second sample)    | m/s          |
/// | 4     | wind direction                         | degrees      |
/// | 5     | wind sample interval                   | seconds      |
/// | 6     | station pressure                       | millibar     |
/// | 7     | air temperature                        | celsius      |
/// | 8     | relative humidity                      | percent      |
/// | 9     | illuminance                            | lux          |
/// | 10    | UV                                     | index        |
/// | 11    | solar radiation                        | W/m^2        |
/// | 12    | rain amount over previous minute       | mm           |
/// | 13    | precipitation type                     |              |
/// | 14    | lightning strike avg distance          | km           |
/// | 15    | lightning strike count                 |              |
/// | 16    | battery                                | volts        |
/// | 17    | report interval                        | minutes      |
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ObservationReport {
    pub serial_number: String,
    pub hub_sn: String,
    #[serde(deserialize_with = "nullable_rows")]
    pub obs: Vec<Vec<f64>>,
    pub firmware_revision: i64,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct DeviceStatusReport {
    pub serial_number: String,
    pub hub_sn: String,
    pub timestamp: i64,
    pub uptime: i64,
    pub voltage: f64,
    pub firmware_revision: i64,
    pub rssi: i64,
    pub hub_rssi: i64,
    /// Bit field of failed sensors, zero when all sensors are OK
    pub sensor_status: i64,
    pub debug: i64,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct HubStatusReport {
    pub serial_number: String,
    pub firmware_revision: String,
    pub uptime: f64,
    pub rssi: f64,
    pub timestamp: i64,
    /// Comma separated reset causes, e.g. "BOR,PIN,POR"
    pub reset_flags: String,
    pub seq: i64,
    #[serde(deserialize_with = "nullable_values")]
    pub fs: Vec<i64>,
    /// 0: version, 1: reboot count, 2: I2C bus error count, 3: radio status, 4: radio network ID
    #[serde(deserialize_with = "nullable_values")]
    pub radio_stats: Vec<f64>,
    #[serde(deserialize_with = "nullable_values")]
    pub mqtt_stats: Vec<i64>,
}
