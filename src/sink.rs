//! Console and CSV sinks for streamed measurements.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use crate::measurement::PollCycle;

/// Receives each successful poll cycle.
///
/// `begin` is called once before streaming starts so sinks can write their
/// headers; `record` once per cycle. Implementations flush eagerly —
/// operators rely on partial logs surviving a crash.
pub trait MeasurementSink: Send {
    fn begin(&mut self, channel_count: usize, unit: &str) -> Result<()>;
    fn record(&mut self, cycle: &PollCycle) -> Result<()>;
}

/// One CSV row per cycle: `Timestamp, Elapsed_s, CH1_<unit>…CHN_<unit>`,
/// flushed after every write.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create CSV file at {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: csv::Writer::from_writer(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MeasurementSink for CsvSink {
    fn begin(&mut self, channel_count: usize, unit: &str) -> Result<()> {
        let mut header = vec!["Timestamp".to_string(), "Elapsed_s".to_string()];
        header.extend((1..=channel_count).map(|ch| format!("CH{ch}_{unit}")));
        self.writer
            .write_record(&header)
            .context("failed to write CSV header")?;
        self.writer.flush().context("failed to flush CSV header")?;
        info!("logging to {}", self.path.display());
        Ok(())
    }

    fn record(&mut self, cycle: &PollCycle) -> Result<()> {
        let mut row = vec![
            cycle.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.2}", cycle.elapsed.as_secs_f64()),
        ];
        row.extend(cycle.measurements.iter().map(|m| format!("{:.3}", m.value)));
        self.writer
            .write_record(&row)
            .context("failed to write CSV row")?;
        // Durability over batching: a crash must not cost the session so far.
        self.writer.flush().context("failed to flush CSV row")
    }
}

/// Fixed-width console table, values at 3 decimal places.
pub struct ConsoleSink<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> MeasurementSink for ConsoleSink<W> {
    fn begin(&mut self, channel_count: usize, _unit: &str) -> Result<()> {
        let mut header = format!("{:>10}", "Time(s)");
        for ch in 1..=channel_count {
            header.push_str(&format!(" | {:>10}", format!("CH{ch}")));
        }
        let rule = "-".repeat(header.len());
        writeln!(self.out, "{header}\n{rule}").context("console write failed")?;
        Ok(())
    }

    fn record(&mut self, cycle: &PollCycle) -> Result<()> {
        let mut row = format!("{:>10.2}", cycle.elapsed.as_secs_f64());
        for m in &cycle.measurements {
            row.push_str(&format!(" | {:>10.3}", m.value));
        }
        writeln!(self.out, "{row}").context("console write failed")?;
        self.out.flush().context("console flush failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use chrono::Utc;
    use std::time::Duration;

    fn cycle(values: &[f64], elapsed_s: f64) -> PollCycle {
        let now = Utc::now();
        PollCycle {
            timestamp: now,
            elapsed: Duration::from_secs_f64(elapsed_s),
            measurements: values
                .iter()
                .enumerate()
                .map(|(i, &value)| Measurement {
                    channel: i + 1,
                    value,
                    unit: "V".to_string(),
                    timestamp: now,
                })
                .collect(),
        }
    }

    #[test]
    fn csv_header_and_rows_match_the_log_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        sink.begin(3, "V").unwrap();
        sink.record(&cycle(&[118.3004, 117.9, 118.1], 1.0)).unwrap();
        sink.record(&cycle(&[118.4, 117.8, 118.0], 2.0)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Timestamp,Elapsed_s,CH1_V,CH2_V,CH3_V");
        assert!(lines[1].ends_with(",1.00,118.300,117.900,118.100"));
    }

    #[test]
    fn console_rows_are_fixed_width() {
        let mut sink = ConsoleSink::with_writer(Vec::new());
        sink.begin(2, "V").unwrap();
        sink.record(&cycle(&[118.3, 117.9], 12.5)).unwrap();
        let text = String::from_utf8(sink.out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Time(s)"));
        assert!(lines[2].contains("118.300"));
        assert_eq!(lines[2], format!("{:>10.2} | {:>10.3} | {:>10.3}", 12.5, 118.3, 117.9));
    }
}
