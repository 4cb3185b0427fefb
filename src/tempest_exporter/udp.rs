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

use crate::batch::{Outbox, Trigger};
use crate::derive::Deriver;
use crate::report::{self, ReportError};
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PORT: u16 = 50222;
const BUFFER_SIZE: usize = 1500;

/// Turns report payloads into metrics in the outbox, waking the pusher for each report.
#[derive(Debug, Clone)]
pub struct ReportHandler {
    deriver: Deriver,
    outbox: Outbox,
    trigger: Trigger,
}

impl ReportHandler {
    pub fn new(deriver: Deriver, outbox: Outbox, trigger: Trigger) -> Self {
        ReportHandler {
            deriver,
            outbox,
            trigger,
        }
    }

    /// Parse a report and queue the metrics derived from it, returning the number of
    /// metrics queued. Reports that can't be parsed are an error but leave the outbox
    /// unchanged.
    pub fn handle(&self, bytes: &[u8]) -> Result<usize, ReportError> {
        let report = report::parse_report(bytes)?;
        let metrics = self.deriver.derive(&report);
        let num = metrics.len();

        let dropped = self.outbox.send_all(metrics);
        if dropped > 0 {
            tracing::warn!(
                message = "outbox full, dropped metrics",
                report_type = %report.report_type(),
                num_dropped = dropped,
            );
        }

        self.trigger.notify();
        Ok(num - dropped)
    }
}

/// Receives reports broadcast by a Tempest hub on the local network.
#[derive(Debug)]
pub struct ReportListener {
    socket: UdpSocket,
}

impl ReportListener {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(ReportListener { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle each report received until cancelled. Reports that can't be parsed are
    /// logged and skipped, errors reading from the socket are returned.
    pub async fn run(&self, handler: &ReportHandler, token: CancellationToken) -> io::Result<()> {
        let mut buf = [0u8; BUFFER_SIZE];

        loop {
            let (len, addr) = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                res = self.socket.recv_from(&mut buf) => res?,
            };

            let bytes = &buf[..len];
            tracing::debug!(message = "UDP in", address = %addr, payload = %String::from_utf8_lossy(bytes));

            if let Err(e) = handler.handle(bytes) {
                tracing::warn!(message = "error parsing report", address = %addr, error = %e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ReportHandler, ReportListener};
    use crate::batch::{outbox, trigger};
    use crate::derive::Deriver;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio_util::sync::CancellationToken;

    const RAPID_WIND: &[u8] =
        br#"{"serial_number":"ST-00019709","type":"rapid_wind","hub_sn":"HB-00031344","ob":[1688668572,0.85,113]}"#;

    #[test]
    fn test_handle_report() {
        let (outbox, mut reader) = outbox(10);
        let (trigger, mut wakeup) = trigger();
        let handler = ReportHandler::new(Deriver::new(), outbox, trigger);

        assert_eq!(2, handler.handle(RAPID_WIND).unwrap());
        assert_eq!(2, handler.handle(RAPID_WIND).unwrap());

        assert_eq!(4, reader.drain().len());
        // Two reports but only a single wake
        assert!(wakeup.try_wait());
        assert!(!wakeup.try_wait());
    }

    #[test]
    fn test_handle_report_invalid() {
        let (outbox, mut reader) = outbox(10);
        let (trigger, mut wakeup) = trigger();
        let handler = ReportHandler::new(Deriver::new(), outbox, trigger);

        assert!(handler.handle(br#"{"type":"bogus_type"}"#).is_err());
        assert!(reader.drain().is_empty());
        assert!(!wakeup.try_wait());
    }

    #[test]
    fn test_handle_report_outbox_full() {
        let (outbox, mut reader) = outbox(1);
        let (trigger, _wakeup) = trigger();
        let handler = ReportHandler::new(Deriver::new(), outbox, trigger);

        assert_eq!(1, handler.handle(RAPID_WIND).unwrap());
        assert_eq!(1, reader.drain().len());
    }

    #[tokio::test]
    async fn test_listener_receives_reports() {
        let (outbox, mut reader) = outbox(10);
        let (trigger, mut wakeup) = trigger();
        let handler = ReportHandler::new(Deriver::new(), outbox, trigger);

        let listener = ReportListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move { listener.run(&handler, child).await });

        let sender = UdpSocket::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        sender.send_to(br#"{"type":"bogus_type"}"#, addr).await.unwrap();
        sender.send_to(RAPID_WIND, addr).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), wakeup.wait())
            .await
            .expect("timed out waiting for report");

        token.cancel();
        task.await.unwrap().unwrap();

        let metrics = reader.drain();
        assert_eq!(2, metrics.len());
        assert_eq!("tempest_wind_ms", metrics[0].name());
    }
}
