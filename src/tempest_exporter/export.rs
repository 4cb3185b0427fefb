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

use crate::batch::BatchSink;
use crate::client::ClientError;
use crate::metrics::{self, Observation};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::error;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ExportError {
    Client(ClientError),
    Io(PathBuf, io::Error),
    Encode(PathBuf, prometheus::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(e) => write!(f, "error fetching observations: {}", e),
            Self::Io(p, e) => write!(f, "error writing {}: {}", p.display(), e),
            Self::Encode(p, e) => write!(f, "error encoding metrics for {}: {}", p.display(), e),
        }
    }
}

impl error::Error for ExportError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Client(e) => Some(e),
            Self::Io(_, e) => Some(e),
            Self::Encode(_, e) => Some(e),
        }
    }
}

impl From<ClientError> for ExportError {
    fn from(e: ClientError) -> Self {
        Self::Client(e)
    }
}

/// Writes each batch of metrics to its own gzip compressed file in the Prometheus
/// text format, suitable for backfilling with `promtool tsdb create-blocks-from openmetrics`
/// after decompression.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the file the batch numbered `n` is written to.
    pub fn path(&self, n: usize) -> PathBuf {
        self.dir.join(format!("tempest_{:03}.txt.gz", n))
    }

    fn write_file(path: &Path, metrics: &[Observation]) -> Result<(), ExportError> {
        let io_err = |e| ExportError::Io(path.to_owned(), e);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;

        let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
        metrics::encode_text(metrics, &mut gz).map_err(|e| ExportError::Encode(path.to_owned(), e))?;

        let mut buf = gz.finish().map_err(io_err)?;
        buf.flush().map_err(io_err)
    }
}

impl BatchSink for FileSink {
    fn write_batch(&mut self, n: usize, metrics: &[Observation]) -> Result<(), ExportError> {
        let path = self.path(n);
        tracing::info!(message = "writing metrics", path = %path.display(), num_metrics = metrics.len());
        Self::write_file(&path, metrics)
    }
}

#[cfg(test)]
mod test {
    use super::FileSink;
    use crate::batch::BatchSink;
    use crate::metrics::{Observation, PRESSURE, TEMPERATURE};
    use flate2::read::GzDecoder;
    use std::fs::File;
    use std::io::Read;

    #[test]
    fn test_path() {
        let sink = FileSink::new("/tmp/tempest");
        assert_eq!("/tmp/tempest/tempest_001.txt.gz", sink.path(1).to_str().unwrap());
        assert_eq!("/tmp/tempest/tempest_123.txt.gz", sink.path(123).to_str().unwrap());
    }

    #[test]
    fn test_write_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path());
        let metrics = vec![
            Observation::new(&PRESSURE, "ST-00019709", 98781.0, 1688668741),
            Observation::new(&TEMPERATURE, "ST-00019709", 19.0, 1688668741).with_kind("air"),
        ];

        sink.write_batch(2, &metrics).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(dir.path().join("tempest_002.txt.gz")).unwrap())
            .read_to_string(&mut text)
            .unwrap();

        assert!(text.contains("tempest_pressure_pa{instance=\"ST-00019709\"} 98781 1688668741000"));
        assert!(text.contains("tempest_temperature_c{instance=\"ST-00019709\",kind=\"air\"} 19 1688668741000"));
    }

    #[test]
    fn test_write_batch_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path());

        let many: Vec<Observation> = (0..100)
            .map(|i| Observation::new(&PRESSURE, "ST-00019709", 98781.0, 1688668741 + i * 60))
            .collect();
        sink.write_batch(1, &many).unwrap();
        sink.write_batch(1, &many[..1]).unwrap();

        let mut text = String::new();
        GzDecoder::new(File::open(sink.path(1)).unwrap())
            .read_to_string(&mut text)
            .unwrap();

        assert_eq!(1, text.lines().filter(|l| l.starts_with("tempest_pressure_pa{")).count());
    }
}
