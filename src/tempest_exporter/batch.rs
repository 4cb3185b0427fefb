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

//! Batching of derived metrics for pushing or exporting.
//!
//! Live reports are put in an [`Outbox`] and a [`Trigger`] wakes a [`Pusher`] which
//! sends everything waiting in the outbox in a single batch. Historical reports are
//! fetched a day at a time by a [`Backfill`] and written out in batches of up to
//! 200,000 metrics.

use crate::client::{ClientError, Station};
use crate::derive::Deriver;
use crate::export::ExportError;
use crate::metrics::Observation;
use crate::report::Report;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_OUTBOX_CAPACITY: usize = 1000;
pub const DEFAULT_BATCH_LIMIT: usize = 200_000;

/// Destination for batches of live metrics.
pub trait MetricSink {
    type Error: fmt::Display;

    fn send(&self, metrics: &[Observation]) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Source of historical reports for a station.
pub trait ObservationSource {
    fn observations(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Future<Output = Result<Report, ClientError>> + Send;
}

/// Destination for numbered batches of historical metrics.
pub trait BatchSink {
    fn write_batch(&mut self, n: usize, metrics: &[Observation]) -> Result<(), ExportError>;
}

/// Create a new outbox that holds up to `capacity` metrics until drained.
pub fn outbox(capacity: usize) -> (Outbox, OutboxReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (Outbox { tx }, OutboxReader { rx })
}

/// Sending half of the outbox, never blocks.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Observation>,
}

impl Outbox {
    /// Add metrics to the outbox, returning the number that didn't fit.
    pub fn send_all<I>(&self, metrics: I) -> usize
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut dropped = 0;
        for m in metrics {
            if self.tx.try_send(m).is_err() {
                dropped += 1;
            }
        }

        dropped
    }
}

#[derive(Debug)]
pub struct OutboxReader {
    rx: mpsc::Receiver<Observation>,
}

impl OutboxReader {
    /// Remove and return every metric currently in the outbox.
    pub fn drain(&mut self) -> Vec<Observation> {
        let mut out = Vec::new();
        while let Ok(m) = self.rx.try_recv() {
            out.push(m);
        }

        out
    }
}

/// Create a new coalescing trigger. Notifications made while a wake is already
/// pending are merged into that wake.
pub fn trigger() -> (Trigger, Wakeup) {
    let (tx, rx) = mpsc::channel(1);
    (Trigger { tx }, Wakeup { rx })
}

#[derive(Debug, Clone)]
pub struct Trigger {
    tx: mpsc::Sender<()>,
}

impl Trigger {
    /// Request a wake, returning false if one was already pending.
    pub fn notify(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

#[derive(Debug)]
pub struct Wakeup {
    rx: mpsc::Receiver<()>,
}

impl Wakeup {
    /// Wait for a wake, returning false once every `Trigger` has been dropped.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }

    /// Consume a pending wake without waiting, returning false if there wasn't one.
    pub fn try_wait(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}

/// Sends batches of metrics from the outbox each time it is woken.
///
/// Only a single batch is ever being sent at once. Metrics that arrive while a batch
/// is being sent are picked up on the next wake.
#[derive(Debug)]
pub struct Pusher<S> {
    sink: S,
    outbox: OutboxReader,
    wakeup: Wakeup,
}

impl<S> Pusher<S>
where
    S: MetricSink,
{
    pub fn new(sink: S, outbox: OutboxReader, wakeup: Wakeup) -> Self {
        Pusher { sink, outbox, wakeup }
    }

    /// Push metrics on each wake until cancelled or every `Trigger` is dropped.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                woke = self.wakeup.wait() => {
                    if !woke {
                        break;
                    }

                    self.push().await;
                }
            }
        }

        tracing::debug!("pusher stopped");
    }

    /// Send everything currently in the outbox, returning the number of metrics sent.
    pub async fn push(&mut self) -> usize {
        let batch = self.outbox.drain();
        if batch.is_empty() {
            return 0;
        }

        match self.sink.send(&batch).await {
            Ok(_) => {
                tracing::debug!(message = "pushed metrics", num_metrics = batch.len());
                batch.len()
            }
            Err(e) => {
                tracing::error!(message = "error pushing metrics", num_metrics = batch.len(), error = %e);
                0
            }
        }
    }
}

/// Fetches historical observations one day at a time and writes the derived metrics
/// out in batches.
#[derive(Debug)]
pub struct Backfill<S, W> {
    source: S,
    sink: W,
    deriver: Deriver,
    limit: usize,
}

impl<S, W> Backfill<S, W>
where
    S: ObservationSource,
    W: BatchSink,
{
    pub fn new(source: S, sink: W, deriver: Deriver) -> Self {
        Backfill {
            source,
            sink,
            deriver,
            limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Set the number of metrics after which a batch is written.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Fetch observations for every station from the time the newest station was
    /// created until the time given by `now`, returning the number of batches written.
    ///
    /// Batches are numbered starting from one. Any error fetching observations or
    /// writing a batch stops the backfill.
    pub async fn run<C>(&mut self, stations: &[Station], now: C) -> Result<usize, ExportError>
    where
        C: Fn() -> DateTime<Utc>,
    {
        let mut cur = match stations.iter().map(|s| s.created_at).max() {
            Some(t) => t,
            None => return Ok(0),
        };

        let mut written = 0;

        loop {
            let mut batch = Vec::new();

            while cur < now() && batch.len() < self.limit {
                // One day of one minute observations per request
                let next = cur + Duration::days(1);

                for station in stations {
                    tracing::info!(
                        message = "fetching observations",
                        station = %station.name,
                        start = %cur.to_rfc3339(),
                    );

                    let report = self.source.observations(station, cur, next).await?;
                    batch.extend(self.deriver.derive(&report));
                }

                cur = next;
            }

            if batch.is_empty() {
                break;
            }

            written += 1;
            self.sink.write_batch(written, &batch)?;
        }

        Ok(written)
    }
}
