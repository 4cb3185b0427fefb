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

use crate::batch::ObservationSource;
use crate::report::{self, Report, ReportError, ReportType};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;

const DEVICE_TYPE_TEMPEST: &str = "ST";

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidUrl(String),
    Unauthorized,
    Unexpected(StatusCode, String),
    Report(ReportError),
    UnexpectedReport(ReportType),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidUrl(u) => write!(f, "invalid API URL {}", u),
            Self::Unauthorized => write!(f, "API token rejected"),
            Self::Unexpected(status, path) => write!(f, "unexpected status {} for {}", status, path),
            Self::Report(e) => write!(f, "{}", e),
            Self::UnexpectedReport(t) => write!(f, "unexpected {} report for observations", t),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Report(e) => Some(e),
            _ => None,
        }
    }
}

/// A station and the Tempest device attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub name: String,
    pub station_id: i64,
    pub device_id: i64,
    pub serial_number: String,
    pub created_at: DateTime<Utc>,
}

/// Client for the WeatherFlow REST API, used to fetch historical observations.
#[derive(Debug)]
pub struct TempestClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl TempestClient {
    const USER_AGENT: &'static str = "Tempest Prometheus Exporter (https://github.com/56quarters/tempest_exporter)";
    const JSON_RESPONSE: &'static str = "application/json";

    pub fn new<S: Into<String>>(client: Client, base_url: &str, token: S) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|_| ClientError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        Ok(TempestClient {
            client,
            base_url,
            token: token.into(),
        })
    }

    /// Fetch all stations for the account, skipping those without a Tempest device.
    pub async fn stations(&self) -> Result<Vec<Station>, ClientError> {
        let url = self.stations_url();
        tracing::debug!(message = "making station list request", path = %url.path());

        let res = self.make_request(url).await?;
        let stations = res.json::<StationsResponse>().await.map_err(ClientError::Internal)?;
        Ok(stations.into_stations())
    }

    /// Fetch observations made by the Tempest device of a station between `start`
    /// and `end`, setting the serial number of the device on the returned report.
    pub async fn observations(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Report, ClientError> {
        let url = self.observations_url(station.device_id, start, end);
        tracing::debug!(
            message = "making observations request",
            path = %url.path(),
            start = start.timestamp(),
            end = end.timestamp(),
        );

        let res = self.make_request(url).await?;
        let bytes = res.bytes().await.map_err(ClientError::Internal)?;
        let mut report = report::parse_report(&bytes).map_err(|e| {
            tracing::debug!(message = "unparsable observations", body = %String::from_utf8_lossy(&bytes));
            ClientError::Report(e)
        })?;

        match report.report_type() {
            ReportType::StationObservation => {
                report.set_serial_number(station.serial_number.clone());
                Ok(report)
            }
            other => Err(ClientError::UnexpectedReport(other)),
        }
    }

    async fn make_request(&self, url: Url) -> Result<Response, ClientError> {
        let path = url.path().to_owned();
        let res = self
            .client
            .get(url)
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if status == StatusCode::OK {
            Ok(res)
        } else if status == StatusCode::UNAUTHORIZED {
            Err(ClientError::Unauthorized)
        } else {
            Err(ClientError::Unexpected(status, path))
        }
    }

    fn stations_url(&self) -> Url {
        let mut url = self.base_url.clone();
        {
            url.path_segments_mut()
                .map(|mut p| {
                    p.pop_if_empty().push("stations");
                })
                .expect("base URL validated on construction");
        }

        url.query_pairs_mut().append_pair("token", &self.token);
        url
    }

    fn observations_url(&self, device_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Url {
        let mut url = self.base_url.clone();
        {
            url.path_segments_mut()
                .map(|mut p| {
                    p.pop_if_empty()
                        .push("observations")
                        .push("device")
                        .push(&device_id.to_string());
                })
                .expect("base URL validated on construction");
        }

        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("time_start", &start.timestamp().to_string())
            .append_pair("time_end", &end.timestamp().to_string());
        url
    }
}

impl ObservationSource for TempestClient {
    async fn observations(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Report, ClientError> {
        TempestClient::observations(self, station, start, end).await
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct StationsResponse {
    #[serde(default)]
    stations: Vec<StationResponse>,
}

impl StationsResponse {
    fn into_stations(self) -> Vec<Station> {
        let mut out = Vec::new();

        for station in self.stations {
            let device = station
                .devices
                .iter()
                .filter(|d| d.device_type == DEVICE_TYPE_TEMPEST && d.device_id != 0 && !d.serial_number.is_empty())
                .last();

            let created_at = Utc.timestamp_opt(station.created_epoch, 0).single();
            match (device, created_at) {
                (Some(d), Some(created_at)) => out.push(Station {
                    name: station.name.clone(),
                    station_id: station.station_id,
                    device_id: d.device_id,
                    serial_number: d.serial_number.clone(),
                    created_at,
                }),
                _ => {
                    tracing::debug!(message = "skipping station without Tempest device", station = %station.name);
                }
            }
        }

        out
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct StationResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    station_id: i64,
    #[serde(default)]
    created_epoch: i64,
    #[serde(default)]
    devices: Vec<DeviceResponse>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DeviceResponse {
    #[serde(default)]
    device_id: i64,
    #[serde(default)]
    device_type: String,
    #[serde(default)]
    serial_number: String,
}
