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

use crate::batch::MetricSink;
use crate::metrics::{self, Observation};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use prometheus::TEXT_FORMAT;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum PushError {
    Internal(reqwest::Error),
    Encode(prometheus::Error),
    InvalidUrl(String),
    Unexpected(StatusCode, Url),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::Encode(e) => write!(f, "unable to encode metrics: {}", e),
            Self::InvalidUrl(u) => write!(f, "invalid push gateway URL {}", u),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
        }
    }
}

impl error::Error for PushError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Encode(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for adding metrics to a Prometheus push gateway.
///
/// Metrics are added to the group for a job, replacing only metrics with the same
/// name in that group (`POST` semantics).
#[derive(Debug)]
pub struct PushClient {
    client: Client,
    url: Url,
}

impl PushClient {
    const USER_AGENT: &'static str = "Tempest Prometheus Exporter (https://github.com/56quarters/tempest_exporter)";

    pub fn new(client: Client, base_url: &str, job: &str) -> Result<Self, PushError> {
        let url = Self::job_url(base_url, job)?;
        Ok(PushClient { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn push(&self, metrics: &[Observation]) -> Result<(), PushError> {
        let mut buf = Vec::new();
        metrics::encode_text(metrics, &mut buf).map_err(PushError::Encode)?;
        tracing::debug!(message = "pushing metrics", url = %self.url, num_bytes = buf.len());

        let res = self
            .client
            .post(self.url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(CONTENT_TYPE, TEXT_FORMAT)
            .body(buf)
            .send()
            .await
            .map_err(PushError::Internal)?;

        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PushError::Unexpected(status, self.url.clone()))
        }
    }

    fn job_url(base_url: &str, job: &str) -> Result<Url, PushError> {
        let trimmed = base_url.trim_end_matches('/');
        let encoded_job = utf8_percent_encode(job, NON_ALPHANUMERIC);
        Url::parse(&format!("{}/metrics/job/{}", trimmed, encoded_job))
            .map_err(|_| PushError::InvalidUrl(base_url.to_owned()))
    }
}

impl MetricSink for PushClient {
    type Error = PushError;

    async fn send(&self, metrics: &[Observation]) -> Result<(), Self::Error> {
        self.push(metrics).await
    }
}
